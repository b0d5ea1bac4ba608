//! Contract model: the canonical, backend-agnostic service description

pub mod duration;
pub mod image;
pub mod model;
pub mod resolved;
pub mod target;

pub use duration::{duration_seconds, parse_duration};
pub use image::ImageReference;
pub use model::{
    EnvSecret, EnvVar, EphemeralMount, ExportVar, Exports, FileSecret, FirewallAction,
    FirewallDirection, FirewallRule, HealthCheck, HostPathType, HypervisorSettings, Mounts,
    PersistentVolume, PortMapping, Protocol, Requirement, Resources, Secrets, SecurityContext,
    ServiceContract, UserNamespaceMode, VolumeMount,
};
pub use resolved::ResolvedContract;
pub use target::RenderTarget;
