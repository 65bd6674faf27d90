//! # Constants for Thing Identity Vending
//!
//! Defaults for the service, the configuration document and the
//! permission documents handed to the API gateway.

// =============================================================================
// SERVICE
// =============================================================================

/// Default port for the Identity Service
pub const IDENTITY_SERVICE_PORT: u16 = 8080;

/// Maximum accepted request body size (bytes)
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

/// Registration endpoint path
pub const REGISTER_PATH: &str = "/register";

/// Authorization endpoint path
pub const AUTHORIZE_PATH: &str = "/authorize";

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

/// Configuration document path handed to the configuration provider
pub const ENV_APP_CONFIG_PATH: &str = "APP_CONFIG_PATH";

/// Local JSON file backing the configuration provider
pub const ENV_APP_CONFIG_FILE: &str = "APP_CONFIG_FILE";

/// Log level filter
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Bind host override
pub const ENV_SERVICE_HOST: &str = "SERVICE_HOST";

/// Bind port override
pub const ENV_SERVICE_PORT: &str = "SERVICE_PORT";

/// Identity Service URL used by the device client
pub const ENV_IDENTITY_SERVICE_URL: &str = "IDENTITY_SERVICE_URL";

/// JSON table of user access tokens
pub const ENV_APP_USERS_FILE: &str = "APP_USERS_FILE";

/// Toggle for permissive CORS headers
pub const ENV_ENABLE_CORS: &str = "ENABLE_CORS";

/// Region reported by the local identity directory
pub const ENV_DIRECTORY_REGION: &str = "DIRECTORY_REGION";

/// Account reported by the local identity directory
pub const ENV_DIRECTORY_ACCOUNT: &str = "DIRECTORY_ACCOUNT";

/// Device client storage directory
pub const ENV_DEVICE_STORAGE_PATH: &str = "DEVICE_STORAGE_PATH";

// =============================================================================
// CONFIGURATION DEFAULTS
// =============================================================================

/// Default configuration document path
pub const DEFAULT_APP_CONFIG_PATH: &str = "/thing-vending/dev/config-parameters";

/// Default local configuration file
pub const DEFAULT_APP_CONFIG_FILE: &str = "./config/parameters.json";

/// Default region of the local identity directory
pub const DEFAULT_DIRECTORY_REGION: &str = "local-1";

/// Default account of the local identity directory
pub const DEFAULT_DIRECTORY_ACCOUNT: &str = "000000000000";

/// Default thing type prefix rule
pub const DEFAULT_THING_TYPE_NAME_RULE: &str = "Cvm";

/// Number of space separated parts in a bearer token
pub const DEFAULT_TOKEN_PAYLOAD_LENGTH: usize = 2;

/// Bearer token prefix identifying devices
pub const DEFAULT_TOKEN_IDENTIFIER_DEVICE: &str = "DeviceToken";

/// Bearer token prefix identifying users
pub const DEFAULT_TOKEN_IDENTIFIER_USER: &str = "JWT";

/// Preferred root CA source
pub const DEFAULT_ROOT_CA_PREFERRED: &str = "https://www.amazontrust.com/repository/AmazonRootCA1.pem";

/// Backup root CA source
pub const DEFAULT_ROOT_CA_BACKUP: &str =
    "https://www.symantec.com/content/en/us/enterprise/verisign/roots/VeriSign-Class%203-Public-Primary-Certification-Authority-G5.pem";

// =============================================================================
// PERMISSION DOCUMENTS
// =============================================================================

/// Policy language version, always this literal
pub const POLICY_VERSION: &str = "2012-10-17";

/// The only action granted or denied by generated documents
pub const EXECUTE_API_ACTION: &str = "execute-api:Invoke";

/// Principal id used when the caller could not be identified
pub const UNKNOWN_PRINCIPAL: &str = "unknown";

/// Allowed resource path characters
pub const RESOURCE_PATH_PATTERN: &str = r"^[/.a-zA-Z0-9\-*]+$";

// =============================================================================
// THING ATTRIBUTES
// =============================================================================

/// Attribute carrying the registration time (epoch seconds)
pub const ATTRIBUTE_CREATION_DATE: &str = "creationDate";

/// Attribute carrying the agent version from the request
pub const ATTRIBUTE_VERSION: &str = "version";

/// Allowed thing name characters (directory naming rule)
pub const THING_NAME_PATTERN: &str = r"^[a-zA-Z0-9:_\-]{1,128}$";

// =============================================================================
// DEVICE CLIENT
// =============================================================================

/// Default storage directory for device credentials
pub const DEFAULT_DEVICE_STORAGE_PATH: &str = "./device-data";

/// HTTP timeout for device client requests (seconds)
pub const DEVICE_CLIENT_TIMEOUT_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_version_literal() {
        assert_eq!(POLICY_VERSION, "2012-10-17");
    }

    #[test]
    fn test_token_defaults() {
        assert_eq!(DEFAULT_TOKEN_PAYLOAD_LENGTH, 2);
        assert_ne!(DEFAULT_TOKEN_IDENTIFIER_DEVICE, DEFAULT_TOKEN_IDENTIFIER_USER);
    }
}
