//! satchel-services — mailbox store, chunk reassembly, session registry,
//! and the command dispatcher. The daemon wires these together around one
//! UDP socket.

pub mod dispatch;
pub mod mailbox;
pub mod reassembly;
pub mod session;

pub use dispatch::Dispatcher;
pub use mailbox::{FsMailbox, MailboxStore, StoreError};
pub use reassembly::{Ingest, IngestError, Reassembler, TransferKey};
pub use session::SessionRegistry;
