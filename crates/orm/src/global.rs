//! Opt-in process-wide [`Core`].
//!
//! Nothing in the crate reads this singleton on its own; code that prefers
//! free functions over passing a `Core` around installs one at start-up.

use crate::context::Core;
use crate::entity::Entity;
use crate::error::{ErrorKind, Result};
use crate::query::{Builder, Records, Rows};
use exn::OptionExt;
use std::sync::OnceLock;

static CORE: OnceLock<Core> = OnceLock::new();

/// Install `core` as the process singleton. Hands it back when one is
/// already installed.
pub fn install(core: Core) -> std::result::Result<(), Core> {
    CORE.set(core)
}

pub fn core() -> Option<&'static Core> {
    CORE.get()
}

fn installed() -> Result<&'static Core> {
    core().ok_or_raise(|| ErrorKind::NotInstalled)
}

/// [`Core::table`] on the installed core.
pub fn table(name: impl Into<String>) -> Result<Builder<'static, Rows>> {
    Ok(installed()?.table(name))
}

/// [`Core::model`] on the installed core.
pub fn model<T: Entity>() -> Result<Builder<'static, Records<T>>> {
    Ok(installed()?.model::<T>())
}
