pub mod common;
pub mod composer;
pub mod kind;
pub mod template;

// Re-export commonly used items
pub use common::{CsvRow, DispatchSummary, OutgoingEmail, RecipientRecord, SendOutcome};
pub use composer::MessageComposer;
pub use kind::EmailKind;
pub use template::Template;
