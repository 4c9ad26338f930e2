mod audit;
mod cache;
mod encryption;
mod security;
mod thumbnail;
mod validation;

pub use audit::AuditMiddleware;
pub use cache::{CacheConfig, CacheMiddleware, CacheStats};
pub use encryption::EncryptionMiddleware;
pub use security::{AccessPolicy, RequireIdentity, SecurityMiddleware};
pub use thumbnail::{GenerationMode, ThumbnailMiddleware};
pub use validation::ValidationMiddleware;
