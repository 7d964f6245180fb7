pub mod session;
pub mod strawman;

pub use session::{HistoryContent, HistoryEntry, Role, Session, SessionState};
pub use strawman::{LayoutId, PresentationStrawman, Slide, StructuredBrief};
