use crate::ast::SelectStatement;
use crate::builder::build_cube;
use crate::cellset::{build_cellset, Cellset};
use crate::error::{MdxError, MdxResult};
use crate::model::{quote_segment, Cube, MEMBER_DISPLAY_INFO};
use crate::parser;
use crate::source::{CubeSource, DataSource};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-query settings. Passed explicitly into every execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    /// Reported as each cell's language.
    pub locale: u32,
    /// Used when neither the measure nor a calculated member sets a format string.
    pub default_format_string: String,
    /// Display info reported for measures and calculated members.
    pub display_info: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            locale: 1033,
            default_format_string: "Standard".to_string(),
            display_info: MEMBER_DISPLAY_INFO,
        }
    }
}

/// Holds the bound cube and runs queries against snapshots of it.
///
/// Rebinding builds the replacement cube before swapping it in, so a running query never
/// observes a partially built schema. A failed rebuild leaves the engine unbound.
#[derive(Debug, Default)]
pub struct MdxEngine {
    cube: RwLock<Option<Arc<Cube>>>,
    rebuild: Mutex<()>,
}

impl MdxEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cube(cube: Cube) -> Self {
        Self {
            cube: RwLock::new(Some(Arc::new(cube))),
            rebuild: Mutex::new(()),
        }
    }

    /// Build a cube from `source` over `data` and make it the active cube.
    pub fn bind(&self, source: &CubeSource, data: &DataSource) -> MdxResult<Arc<Cube>> {
        let _guard = self.lock_rebuild();
        match build_cube(source, data) {
            Ok(cube) => {
                let cube = Arc::new(cube);
                *self.write_cube() = Some(cube.clone());
                log::debug!("bound cube {}", cube.name());
                Ok(cube)
            }
            Err(err) => {
                *self.write_cube() = None;
                log::debug!("unbound cube after failed rebuild of {}: {err}", source.name);
                Err(err)
            }
        }
    }

    pub fn unbind(&self) {
        let _guard = self.lock_rebuild();
        *self.write_cube() = None;
    }

    /// The active cube, if any.
    pub fn cube(&self) -> Option<Arc<Cube>> {
        self.read_cube().clone()
    }

    pub fn execute(&self, query: &str, options: &QueryOptions) -> MdxResult<Cellset> {
        let cube = self.cube().ok_or(MdxError::NoCube)?;
        let stmt = parse(query)?;
        execute(&cube, &stmt, options)
    }

    fn read_cube(&self) -> RwLockReadGuard<'_, Option<Arc<Cube>>> {
        match self.cube.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("cube lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_cube(&self) -> RwLockWriteGuard<'_, Option<Arc<Cube>>> {
        match self.cube.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("cube lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_rebuild(&self) -> MutexGuard<'_, ()> {
        match self.rebuild.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("rebuild lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Parse query text into a statement.
pub fn parse(query: &str) -> MdxResult<SelectStatement> {
    parser::parse(query)
}

/// Evaluate a parsed statement against `cube`.
pub fn execute(cube: &Cube, stmt: &SelectStatement, options: &QueryOptions) -> MdxResult<Cellset> {
    if !stmt.cube.eq_ignore_ascii_case(cube.name()) {
        return Err(MdxError::Resolution {
            path: quote_segment(&stmt.cube),
        });
    }
    log::debug!("executing {stmt}");
    build_cellset(cube, stmt, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = QueryOptions::default();
        assert_eq!(options.locale, 1033);
        assert_eq!(options.default_format_string, "Standard");
        assert_eq!(options.display_info, MEMBER_DISPLAY_INFO);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: QueryOptions = serde_json::from_str(r#"{"locale": 1036}"#).unwrap();
        assert_eq!(options.locale, 1036);
        assert_eq!(options.default_format_string, "Standard");
    }

    #[test]
    fn unbound_engine_rejects_queries() {
        let engine = MdxEngine::new();
        let err = engine
            .execute("SELECT FROM [sales]", &QueryOptions::default())
            .unwrap_err();
        assert_eq!(err, MdxError::NoCube);
    }
}
