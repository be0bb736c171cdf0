//! Database enum types with Diesel serialization.
//!
//! Each enum maps a `TEXT` column guarded by a CHECK constraint and implements
//! `ToSql`/`FromSql` so models carry the typed value instead of a string.

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use almanac_rfc::ical::expand::Frequency;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            AsExpression,
            FromSqlRow,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Returns the database string representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                std::str::from_utf8(bytes.as_bytes())?
                    .parse()
                    .map_err(|_e| concat!("Unrecognized ", stringify!($name), " variant").into())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant(s.to_owned())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A stored value that does not name any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized enum variant '{0}'")]
pub struct UnknownVariant(pub String);

text_enum! {
    /// Repetition unit of a stored rule or pattern override.
    ///
    /// Maps to `recurrence_rule.frequency` and `recurrence_override.frequency`.
    RuleFrequency {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

text_enum! {
    /// What happens to events that disappear from a source's feed.
    ///
    /// Maps to `calendar_source.deletion_policy`.
    DeletionPolicy {
        Mirror => "mirror",
        Additive => "additive",
    }
}

text_enum! {
    /// Whether an unchanged body hash short-circuits an import.
    ///
    /// Maps to `calendar_source.sync_mode`.
    SyncMode {
        Delta => "delta",
        Full => "full",
    }
}

text_enum! {
    /// Result of the most recent synchronization attempt.
    ///
    /// Maps to `calendar_source.last_sync_status`.
    SyncStatus {
        Ok => "ok",
        NotModified => "not_modified",
        Error => "error",
    }
}

text_enum! {
    /// Maps to `event_occurrence.kind`.
    OccurrenceKind {
        Recurring => "recurring",
        OneTime => "one_time",
    }
}

impl From<Frequency> for RuleFrequency {
    fn from(frequency: Frequency) -> Self {
        match frequency {
            Frequency::Daily => Self::Daily,
            Frequency::Weekly => Self::Weekly,
            Frequency::Monthly => Self::Monthly,
            Frequency::Yearly => Self::Yearly,
        }
    }
}

impl From<RuleFrequency> for Frequency {
    fn from(frequency: RuleFrequency) -> Self {
        match frequency {
            RuleFrequency::Daily => Self::Daily,
            RuleFrequency::Weekly => Self::Weekly,
            RuleFrequency::Monthly => Self::Monthly,
            RuleFrequency::Yearly => Self::Yearly,
        }
    }
}
