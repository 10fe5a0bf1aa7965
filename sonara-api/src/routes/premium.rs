/// Premium content
///
/// - `GET /v1/premium/lessons` (session + entitlement)

use axum::Json;
use serde::Serialize;

/// One premium lesson
#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub slug: &'static str,
    pub title: &'static str,
    pub instrument: &'static str,
    pub duration_minutes: u32,
}

#[derive(Debug, Serialize)]
pub struct LessonsResponse {
    pub lessons: Vec<Lesson>,
}

const CATALOG: &[Lesson] = &[
    Lesson {
        slug: "breath-support",
        title: "Breath support for sustained notes",
        instrument: "voice",
        duration_minutes: 12,
    },
    Lesson {
        slug: "pitch-matching",
        title: "Pitch matching drills",
        instrument: "voice",
        duration_minutes: 15,
    },
    Lesson {
        slug: "fingerstyle-patterns",
        title: "Fingerstyle picking patterns",
        instrument: "guitar",
        duration_minutes: 20,
    },
    Lesson {
        slug: "two-hand-independence",
        title: "Two-hand independence",
        instrument: "piano",
        duration_minutes: 18,
    },
];

/// Lists the premium lesson catalog
pub async fn list_lessons() -> Json<LessonsResponse> {
    Json(LessonsResponse {
        lessons: CATALOG.to_vec(),
    })
}
