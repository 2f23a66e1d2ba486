//! PhysX runtime linkage
//!
//! PhysX ships either linked into the executable or as five shared libraries. A
//! [`PhysXRuntime`] hides which one is in use: [`StaticRuntime`] has nothing to
//! load, [`DynamicRuntime`] opens the libraries with `libloading` and resolves every
//! export the backend needs by exact name.
//!
//! Library files follow `[lib]BaseName[DEBUG]_[x86|x64].[dll|so]`, for example
//! `libPhysX3Cooking_x64.so` or `PhysX3CommonDEBUG_x86.dll`.

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use crate::physics::config::{PhysXConfig, PhysXLinkage};
use crate::physics::error::PhysicsError;

/// Exports resolved from each library, in load order.
pub const REQUIRED_SYMBOLS: [(&str, &[&str]); 5] = [
    ("PhysX3Common", &["PxCreateFoundation", "PxGetFoundation"]),
    (
        "PhysX3",
        &["PxCreateBasePhysics", "PxRegisterArticulations", "PxRegisterHeightFields"],
    ),
    ("PhysX3Cooking", &["PxCreateCooking"]),
    ("PhysX3CharacterKinematic", &["PxCreateControllerManager"]),
    (
        "PhysX3Extensions",
        &[
            "PxCreateDynamic",
            "PxCreateStatic",
            "PxDefaultCpuDispatcherCreate",
            "PxDefaultSimulationFilterShader",
            "PxRevoluteJointCreate",
            "PxSphericalJointCreate",
        ],
    ),
];

/// Platform file name of a PhysX library.
pub fn library_file_name(base: &str, debug: bool) -> String {
    let arch = if cfg!(target_pointer_width = "64") { "x64" } else { "x86" };
    let debug = if debug { "DEBUG" } else { "" };

    if cfg!(windows) {
        format!("{base}{debug}_{arch}.dll")
    } else {
        format!("lib{base}{debug}_{arch}.so")
    }
}

/// Provider of the native PhysX entry points.
pub trait PhysXRuntime {
    /// Whether the runtime could be loaded. Leaves nothing loaded.
    fn is_available(&self) -> bool;

    fn load(&mut self) -> Result<(), PhysicsError>;

    /// Releases everything `load` acquired. Safe to call when nothing is loaded.
    fn unload(&mut self);

    fn description(&self) -> String;
}

/// Builds the runtime selected by `config.linkage`.
pub fn runtime_for(config: &PhysXConfig) -> Box<dyn PhysXRuntime> {
    match config.linkage {
        PhysXLinkage::Static => Box::new(StaticRuntime),
        PhysXLinkage::Dynamic => Box::new(DynamicRuntime::new(config.library_dir.clone(), config.debug_libraries)),
    }
}

/// PhysX linked into the executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticRuntime;

impl PhysXRuntime for StaticRuntime {
    fn is_available(&self) -> bool {
        true
    }

    fn load(&mut self) -> Result<(), PhysicsError> {
        Ok(())
    }

    fn unload(&mut self) {}

    fn description(&self) -> String {
        "statically linked".to_string()
    }
}

struct LoadedLibrary {
    name: String,
    /// Addresses of the resolved exports, kept for the lifetime of the library.
    symbols: Vec<(&'static str, usize)>,
    _library: Library,
}

/// PhysX loaded from shared libraries at setup time.
pub struct DynamicRuntime {
    library_dir: Option<PathBuf>,
    debug: bool,
    loaded: Vec<LoadedLibrary>,
}

impl DynamicRuntime {
    pub fn new(library_dir: Option<PathBuf>, debug: bool) -> Self {
        Self {
            library_dir,
            debug,
            loaded: Vec::new(),
        }
    }

    fn library_path(&self, base: &str) -> PathBuf {
        let file = library_file_name(base, self.debug);
        match &self.library_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }

    /// Number of exports currently resolved.
    pub fn resolved_symbol_count(&self) -> usize {
        self.loaded.iter().map(|library| library.symbols.len()).sum()
    }

    pub fn is_loaded(&self) -> bool {
        !self.loaded.is_empty()
    }
}

fn open(path: &Path) -> Result<Library, PhysicsError> {
    // SAFETY: PhysX libraries run no initialisation code with preconditions on load.
    unsafe { Library::new(path) }.map_err(|source| PhysicsError::LibraryLoad {
        library: path.display().to_string(),
        source,
    })
}

/// Resolves every name in `symbols`, failing with all the missing ones.
fn resolve(library: &Library, name: &str, symbols: &[&'static str]) -> Result<Vec<(&'static str, usize)>, PhysicsError> {
    let mut resolved = Vec::with_capacity(symbols.len());
    let mut missing = Vec::new();

    for symbol in symbols {
        // SAFETY: the symbol is only recorded as an address, never called through this type.
        match unsafe { library.get::<unsafe extern "C" fn()>(symbol.as_bytes()) } {
            Ok(function) => resolved.push((*symbol, *function as usize)),
            Err(_) => missing.push(symbol.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PhysicsError::MissingSymbols {
            library: name.to_string(),
            symbols: missing,
        });
    }
    Ok(resolved)
}

impl PhysXRuntime for DynamicRuntime {
    fn is_available(&self) -> bool {
        REQUIRED_SYMBOLS
            .iter()
            .all(|(base, _)| open(&self.library_path(base)).is_ok())
    }

    fn load(&mut self) -> Result<(), PhysicsError> {
        self.unload();

        for (base, symbols) in REQUIRED_SYMBOLS {
            let path = self.library_path(base);
            let library = match open(&path) {
                Ok(library) => library,
                Err(error) => {
                    self.unload();
                    return Err(error);
                }
            };

            let name = library_file_name(base, self.debug);
            let symbols = match resolve(&library, &name, symbols) {
                Ok(symbols) => symbols,
                Err(error) => {
                    self.unload();
                    return Err(error);
                }
            };

            debug!(library = %path.display(), symbols = symbols.len(), "Loaded PhysX library");
            self.loaded.push(LoadedLibrary {
                name,
                symbols,
                _library: library,
            });
        }

        info!(symbols = self.resolved_symbol_count(), "PhysX libraries loaded");
        Ok(())
    }

    fn unload(&mut self) {
        // Libraries unload in reverse order of loading
        while let Some(library) = self.loaded.pop() {
            debug!(library = %library.name, "Unloading PhysX library");
        }
    }

    fn description(&self) -> String {
        match &self.library_dir {
            Some(dir) => format!("dynamically loaded from {}", dir.display()),
            None => "dynamically loaded".to_string(),
        }
    }
}

impl Drop for DynamicRuntime {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_file_names() {
        let arch = if cfg!(target_pointer_width = "64") { "x64" } else { "x86" };
        let name = library_file_name("PhysX3Cooking", false);
        let debug_name = library_file_name("PhysX3Common", true);

        if cfg!(windows) {
            assert_eq!(name, format!("PhysX3Cooking_{arch}.dll"));
            assert_eq!(debug_name, format!("PhysX3CommonDEBUG_{arch}.dll"));
        } else {
            assert_eq!(name, format!("libPhysX3Cooking_{arch}.so"));
            assert_eq!(debug_name, format!("libPhysX3CommonDEBUG_{arch}.so"));
        }
    }

    #[test]
    fn test_every_library_has_symbols() {
        let total: usize = REQUIRED_SYMBOLS.iter().map(|(_, symbols)| symbols.len()).sum();
        assert_eq!(total, 13);
        assert!(REQUIRED_SYMBOLS.iter().all(|(_, symbols)| !symbols.is_empty()));
    }

    #[test]
    fn test_missing_libraries() {
        let mut runtime = DynamicRuntime::new(Some(PathBuf::from("/nonexistent/physx")), false);
        assert!(!runtime.is_available());

        match runtime.load() {
            Err(PhysicsError::LibraryLoad { library, .. }) => assert!(library.contains("PhysX3Common")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!runtime.is_loaded());
        assert_eq!(runtime.resolved_symbol_count(), 0);
    }

    #[test]
    fn test_static_runtime() {
        let mut runtime = StaticRuntime;
        assert!(runtime.is_available());
        assert!(runtime.load().is_ok());
        runtime.unload();
    }
}
