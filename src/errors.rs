use thiserror::Error;

#[derive(Error, Debug)]
pub enum NnError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("alloc too small: {0}")]
    AllocSize(String),
    #[error("bad shape: {0}")]
    BadShape(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("os error: {0}")]
    Os(String),
    #[error("threading error: {0}")]
    Threading(String),
    #[error("invalid enum value: {0}")]
    InvalidEnum(String),
    #[error("creation failed: {0}")]
    Create(String),
    #[error("math error: {0}")]
    Math(String),
    #[error("error: {0}")]
    General(String),
}

impl NnError {
    /// Short printable tag for the error kind, used in logs and tooling.
    pub fn tag(&self) -> &'static str {
        match self {
            NnError::InvalidInput(_) => "invalid-input",
            NnError::AllocSize(_) => "alloc-size",
            NnError::BadShape(_) => "bad-shape",
            NnError::Parse(_) => "parse",
            NnError::Io(_) => "io",
            NnError::Os(_) => "os",
            NnError::Threading(_) => "threading",
            NnError::InvalidEnum(_) => "invalid-enum",
            NnError::Create(_) => "create",
            NnError::Math(_) => "math",
            NnError::General(_) => "general",
        }
    }
}

pub type NnResult<T> = Result<T, NnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(NnError::BadShape(String::new()).tag(), "bad-shape");
        assert_eq!(NnError::Parse(String::new()).tag(), "parse");
        assert_eq!(NnError::General(String::new()).tag(), "general");
    }
}
