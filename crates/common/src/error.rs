use thiserror::Error;

/// Errors shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    /// A target kind string that is neither `group` nor `private`.
    #[error("invalid target_type: {0}")]
    InvalidTargetKind(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Context helpers ─────────────────────────────────────────────────────────

/// Error types that can be built from a plain message string.
///
/// Crates implement this for their own error enum and then call
/// [`impl_context!`] inside their error module to get `.context()` and
/// `.with_context()` on `Result` and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait.
///
/// Must be invoked in a module where `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>` are in scope.
///
/// ```ignore
/// // in crates/onebot/src/error.rs
/// qq_agent_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let context = context.into();
                self.with_context(|| context)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let message = format!("{}: {source}", f().into());
                    <Error as $crate::FromMessage>::from_message(message)
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let context = context.into();
                self.with_context(|| context)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
