pub mod registry;

pub use registry::{Attachment, Detachment, StaleSubclient, SubclientRegistry};
