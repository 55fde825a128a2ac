//! Service limits and input validation

/// Maximum rows the service returns in a single call (10000)
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Default rows requested per call (1000)
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Maximum identifiers accepted in one `in`-style filter (5000)
pub const MAX_IDS_PER_REQUEST: usize = 5_000;

/// Default identifiers sent per request before chunking (1000)
pub const DEFAULT_IDS_PER_REQUEST: usize = 1_000;

/// Maximum length for a space identifier (43 chars)
pub const MAX_SPACE_LEN: usize = 43;

/// Maximum length for an external id (255 chars)
pub const MAX_EXTERNAL_ID_LEN: usize = 255;

/// Maximum steps in one query plan (50)
pub const MAX_QUERY_STEPS: usize = 50;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptySpace,
    SpaceTooLong { len: usize, max: usize },
    EmptyExternalId,
    ExternalIdTooLong { len: usize, max: usize },
    PageSizeOutOfRange { size: usize, max: usize },
    IdsPerRequestOutOfRange { count: usize, max: usize },
    TooManySteps { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySpace => write!(f, "Space cannot be empty"),
            Self::SpaceTooLong { len, max } => {
                write!(f, "Space too long: {} chars (max {})", len, max)
            }
            Self::EmptyExternalId => write!(f, "External id cannot be empty"),
            Self::ExternalIdTooLong { len, max } => {
                write!(f, "External id too long: {} chars (max {})", len, max)
            }
            Self::PageSizeOutOfRange { size, max } => {
                write!(f, "Page size out of range: {} (expected 1..={})", size, max)
            }
            Self::IdsPerRequestOutOfRange { count, max } => {
                write!(f, "Ids per request out of range: {} (expected 1..={})", count, max)
            }
            Self::TooManySteps { count, max } => {
                write!(f, "Too many query steps: {} (max {})", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a space identifier
pub fn validate_space(space: &str) -> Result<(), ValidationError> {
    if space.is_empty() {
        return Err(ValidationError::EmptySpace);
    }
    if space.len() > MAX_SPACE_LEN {
        return Err(ValidationError::SpaceTooLong {
            len: space.len(),
            max: MAX_SPACE_LEN,
        });
    }
    Ok(())
}

/// Validate an external id
pub fn validate_external_id(external_id: &str) -> Result<(), ValidationError> {
    if external_id.is_empty() {
        return Err(ValidationError::EmptyExternalId);
    }
    if external_id.len() > MAX_EXTERNAL_ID_LEN {
        return Err(ValidationError::ExternalIdTooLong {
            len: external_id.len(),
            max: MAX_EXTERNAL_ID_LEN,
        });
    }
    Ok(())
}

/// Validate a per-call page size
pub fn validate_page_size(size: usize) -> Result<(), ValidationError> {
    if size == 0 || size > MAX_PAGE_SIZE {
        return Err(ValidationError::PageSizeOutOfRange {
            size,
            max: MAX_PAGE_SIZE,
        });
    }
    Ok(())
}

/// Validate the number of identifiers sent per request
pub fn validate_ids_per_request(count: usize) -> Result<(), ValidationError> {
    if count == 0 || count > MAX_IDS_PER_REQUEST {
        return Err(ValidationError::IdsPerRequestOutOfRange {
            count,
            max: MAX_IDS_PER_REQUEST,
        });
    }
    Ok(())
}

/// Validate the number of steps in a plan
pub fn validate_step_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_QUERY_STEPS {
        return Err(ValidationError::TooManySteps {
            count,
            max: MAX_QUERY_STEPS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_page_size() {
        assert!(validate_page_size(1).is_ok());
        assert!(validate_page_size(MAX_PAGE_SIZE).is_ok());
        assert!(validate_page_size(0).is_err());
        assert!(validate_page_size(MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_validate_space() {
        assert!(validate_space("my_space").is_ok());
        assert_eq!(validate_space(""), Err(ValidationError::EmptySpace));
        assert!(validate_space(&"s".repeat(44)).is_err());
    }

    #[test]
    fn test_validate_ids_per_request() {
        assert!(validate_ids_per_request(DEFAULT_IDS_PER_REQUEST).is_ok());
        assert!(validate_ids_per_request(0).is_err());
        assert!(validate_ids_per_request(MAX_IDS_PER_REQUEST + 1).is_err());
    }
}
