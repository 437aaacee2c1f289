//! Layer discovery: scan tree, credential hook and base path spec selection.

pub mod context;
pub mod selection;
pub mod source;
pub mod unlock;
pub mod volume;

pub use self::context::{ScanContext, ScanNode, ScanNodeId};
pub use self::selection::{SelectionPolicy, VolumeSelection, select_base_path_specs};
pub use self::source::SourceScanner;
pub use self::unlock::{
    ChainedCredentials, CredentialSource, CredentialUnlocker, NoUnlock, StaticCredentials,
    VolumeUnlocker,
};
pub use self::volume::VolumeScanner;
