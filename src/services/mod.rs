//! Business services built on partitioned transactional collections.

pub mod authenticator;
pub mod content;
pub mod contracts;
pub mod data_generator;
pub mod post_manager;

pub use authenticator::{AuthSettings, AuthenticatorService};
pub use content::ContentGenerator;
pub use contracts::{
    AUTHENTICATOR_SERVICE, Authenticator, DataGenerator, GenerationReport, POST_SERVICE,
    PostOperator,
};
pub use data_generator::DataGeneratorService;
pub use post_manager::PostManagementService;
