pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod notifier;
pub mod store;

pub use config::{CancelPolicy, ExportScope, NotifierConfig, PollingConfig, SomnusConfig};
pub use error::{SomnusError, StoreError};
pub use events::{BotEvent, EventAck, Outcome};
pub use models::session::{SessionDocument, SleepSession};
pub use notifier::{HttpNotifier, MessageId, Notifier, NotifierError};
pub use store::{SessionLog, SessionStore};
