//! Macro for implementing wire-string conversions on status enums
//!
//! Status values travel as lowercase strings over the remote API. This macro
//! generates one mapping table for `as_str`, `Display` and `FromStr` so the
//! three can never drift apart.
//!
//! # Example
//!
//! ```rust
//! use meridian_domain::impl_wire_status;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum ExportStatus {
//!     Pending,
//!     Ready,
//! }
//!
//! impl_wire_status!(ExportStatus {
//!     Pending => "pending",
//!     Ready => "ready",
//! });
//!
//! assert_eq!(ExportStatus::Ready.as_str(), "ready");
//! assert_eq!(" READY ".parse::<ExportStatus>(), Ok(ExportStatus::Ready));
//! ```

/// Implements `as_str`, `Display` and `FromStr` for a fieldless status enum
///
/// Parsing trims surrounding whitespace and ignores ASCII case. Unknown
/// values produce an error string naming the enum and the rejected input.
#[macro_export]
macro_rules! impl_wire_status {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Wire representation of this status.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let candidate = s.trim();
                $(
                    if candidate.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("unknown {} value: {:?}", stringify!($enum_name), s))
            }
        }
    };
}
