//! EC2 error code classification

use vpcflow_core::{ErrorClass, ProviderError};

pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
pub const GATEWAY_NOT_ATTACHED: &str = "Gateway.NotAttached";

/// Maps an EC2 error code to how the engine should treat it.
///
/// - `*.NotFound` (`InvalidVpcID.NotFound`, `InvalidGroup.NotFound`, ...): not-found
/// - `DependencyViolation`, `*.Duplicate`, `*.InUse`: conflict
/// - any other code: retryable
pub fn classify_code(code: &str) -> ErrorClass {
    if code.ends_with(".NotFound") {
        ErrorClass::NotFound
    } else if code == DEPENDENCY_VIOLATION
        || code.ends_with(".Duplicate")
        || code.ends_with(".InUse")
    {
        ErrorClass::Conflict
    } else {
        ErrorClass::Retryable
    }
}

/// Builds a classified error from an EC2 error code
pub fn api_error(code: impl Into<String>, message: impl Into<String>) -> ProviderError {
    let code = code.into();
    ProviderError::new(classify_code(&code), code, message)
}

pub type ApiResult<T> = std::result::Result<T, ProviderError>;
