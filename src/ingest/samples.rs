//! Sample corpus written by `init-data` and `ingest --init-sample`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::core::errors::ApiError;

const HEALTH_BENEFITS: &str = "Regular consumption of fruits like apples can contribute to \
overall health and wellness. They provide essential nutrients and fiber.";

const INNOVATION_HISTORY: &str = "Technology companies have transformed how we communicate \
and work. Apple's innovations in personal computing and mobile devices have shaped modern \
technology.";

const HOLIDAY_POLICY: &str = "# Holiday and Leave Policy

## Public holidays

The office is closed on the following public holidays:

- New Year's Day (1 January)
- Good Friday and Easter Monday
- Labour Day (1 May)
- Christmas Day (25 December) and Boxing Day (26 December)

When a public holiday falls on a weekend, the following Monday is a day off.

## Annual leave

Full-time employees receive 20 days of paid annual leave per calendar year.
Up to 5 unused days may be carried over into the first quarter of the next year.
Leave requests must be submitted to your manager at least two weeks in advance.

## Sick leave

Employees receive 10 days of paid sick leave per year. A medical certificate is
required for absences longer than three consecutive working days.

## Business travel

Travel must be approved by a department head before booking. Economy class is
the default for flights under six hours.
";

fn fruit_items() -> serde_json::Value {
    json!([
        { "id": "fruit_1", "text": "Apple is a popular fruit known for its sweetness and crisp texture." },
        { "id": "fruit_2", "text": "Many people enjoy eating apples as a healthy snack." },
        { "id": "fruit_3", "text": "An apple a day keeps the doctor away, as the saying goes." },
        { "id": "fruit_4", "text": "Apples contain fiber, vitamins, and antioxidants that support good health." }
    ])
}

fn technology_items() -> serde_json::Value {
    json!([
        { "id": "tech_1", "text": "The tech company Apple is known for its innovative products like the iPhone." },
        { "id": "tech_2", "text": "Apple Inc. has revolutionized the tech industry with its sleek designs and user-friendly interfaces." },
        { "id": "tech_3", "text": "Apple Computer Company was founded on April 1, 1976, by Steve Jobs, Steve Wozniak, and Ronald Wayne as a partnership." },
        { "id": "tech_4", "text": "Apple's products include iPhone, iPad, Mac computers, and Apple Watch." }
    ])
}

/// Writes the sample folder tree under `dir`. Files that already exist are
/// left alone; the returned list holds only the files written by this call.
pub fn write_sample_data(dir: &Path) -> Result<Vec<PathBuf>, ApiError> {
    let json_pretty = |value: serde_json::Value| {
        serde_json::to_string_pretty(&value).map_err(ApiError::internal)
    };

    let files = [
        ("fruits/apple_fruit_info.json", json_pretty(fruit_items())?),
        (
            "technology/apple_company_info.json",
            json_pretty(technology_items())?,
        ),
        ("general/health_benefits.txt", HEALTH_BENEFITS.to_string()),
        ("general/innovation_history.txt", INNOVATION_HISTORY.to_string()),
        ("hr/holiday_policy.md", HOLIDAY_POLICY.to_string()),
    ];

    let mut written = Vec::new();
    for (relative, contents) in files {
        let path = dir.join(relative);
        if path.exists() {
            tracing::debug!("Sample file already present: {}", path.display());
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ApiError::internal)?;
        }
        fs::write(&path, contents).map_err(ApiError::internal)?;
        tracing::info!("Created sample file {}", path.display());
        written.push(path);
    }

    Ok(written)
}
