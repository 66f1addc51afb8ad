//! Timestamp ordering for listed records.
use crate::errors::ValidationError;
use crate::model::Object;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: SortField,
    pub descending: bool,
}

impl SortOrder {
    pub fn newest_first() -> Self {
        Self {
            field: SortField::CreatedAt,
            descending: true,
        }
    }

    /// Parse `created_at`, `updated_at`, optionally prefixed with `-` for
    /// descending order. An empty value means no ordering.
    pub fn parse(value: &str) -> Result<Option<Self>, ValidationError> {
        if value.is_empty() {
            return Ok(None);
        }
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let field = match name {
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            _ => return Err(ValidationError::UnsupportedOrdering(value.to_string())),
        };
        Ok(Some(Self { field, descending }))
    }
}

pub trait Timestamped {
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

impl Timestamped for Object {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.meta.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta.updated_at
    }
}

/// Ordering strategy applied to fan-out results.
pub trait Sorter<R>: Send + Sync {
    fn sort(&self, records: &mut [R], order: SortOrder);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampSorter;

impl<R: Timestamped> Sorter<R> for TimestampSorter {
    fn sort(&self, records: &mut [R], order: SortOrder) {
        // Never-updated records sort by creation time.
        let key = |record: &R| match order.field {
            SortField::CreatedAt => record.created_at(),
            SortField::UpdatedAt => record.updated_at().or_else(|| record.created_at()),
        };
        records.sort_by(|a, b| {
            let ordering = key(a).cmp(&key(b));
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq)]
    struct Record {
        name: &'static str,
        created: i64,
        updated: Option<i64>,
    }

    impl Timestamped for Record {
        fn created_at(&self) -> Option<DateTime<Utc>> {
            Utc.timestamp_opt(self.created, 0).single()
        }

        fn updated_at(&self) -> Option<DateTime<Utc>> {
            self.updated.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        }
    }

    fn records() -> Vec<Record> {
        vec![
            Record {
                name: "b",
                created: 20,
                updated: None,
            },
            Record {
                name: "a",
                created: 10,
                updated: Some(40),
            },
            Record {
                name: "c",
                created: 30,
                updated: None,
            },
        ]
    }

    fn names(records: &[Record]) -> Vec<&'static str> {
        records.iter().map(|r| r.name).collect()
    }

    #[test]
    fn parse_accepts_known_fields_and_direction() {
        assert_eq!(SortOrder::parse("").expect("empty"), None);
        assert_eq!(
            SortOrder::parse("created_at").expect("asc"),
            Some(SortOrder {
                field: SortField::CreatedAt,
                descending: false
            })
        );
        assert_eq!(
            SortOrder::parse("-updated_at").expect("desc"),
            Some(SortOrder {
                field: SortField::UpdatedAt,
                descending: true
            })
        );
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        assert_eq!(
            SortOrder::parse("-name"),
            Err(ValidationError::UnsupportedOrdering("-name".to_string()))
        );
    }

    #[test]
    fn newest_first_sorts_by_creation_descending() {
        let mut records = records();
        TimestampSorter.sort(&mut records[..], SortOrder::newest_first());
        assert_eq!(names(&records), vec!["c", "b", "a"]);
    }

    #[test]
    fn updated_at_falls_back_to_created_at() {
        let mut records = records();
        TimestampSorter.sort(
            &mut records[..],
            SortOrder {
                field: SortField::UpdatedAt,
                descending: false,
            },
        );
        assert_eq!(names(&records), vec!["b", "c", "a"]);
    }
}
