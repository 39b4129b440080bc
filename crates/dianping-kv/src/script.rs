//! Atomic server-side scripts.

use std::fmt;

use crate::error::Result;
use crate::local::LocalData;

/// In-process rendition of a script, run under the local store's lock.
pub type LocalScriptFn = fn(&mut LocalData, &[String], &[String]) -> Result<i64>;

/// A script executed atomically by the substrate.
///
/// Each script carries its Lua source (run by Redis via `EVALSHA`) and an
/// equivalent function for [`crate::LocalKvStore`]. Both must return the same
/// integer for the same state and inputs.
#[derive(Clone, Copy)]
pub struct KvScript {
    name: &'static str,
    lua: &'static str,
    local: LocalScriptFn,
}

impl KvScript {
    pub const fn new(name: &'static str, lua: &'static str, local: LocalScriptFn) -> Self {
        Self { name, lua, local }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lua(&self) -> &'static str {
        self.lua
    }

    pub(crate) fn run_local(
        &self,
        data: &mut LocalData,
        keys: &[String],
        args: &[String],
    ) -> Result<i64> {
        (self.local)(data, keys, args)
    }
}

impl fmt::Debug for KvScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvScript").field("name", &self.name).finish()
    }
}
