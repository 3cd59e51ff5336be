pub mod provider;

pub use provider::{
    CollaborationProvider, CollaborationRole, GuestsChanged, RoleChange, SoloProvider,
    SubclientInfo,
};
