pub mod diagnostics;
pub mod driver;
pub mod session;
pub mod stealth;

pub use diagnostics::Diagnostics;
pub use driver::{navigate_with_fallback, Key, PageDriver, WaitPolicy};
pub use session::{find_chrome_executable, BrowserSession, SessionConfig};
