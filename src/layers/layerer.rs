//! Loads zero or more user layers (dynamic plugins) and splices their transforms into the
//! pipeline between the spy and the state trackers (component J).
//!
//! Each layer is a native shared object exporting a C-ABI `gapid2_layer_create` symbol that
//! returns a boxed [`Transform`]. The layerer calls every call through the first loaded layer,
//! which forwards to the next loaded layer (or to the state-tracker chain, if it's the last one)
//! via the `next` pointer it was constructed with.

use std::path::Path;
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::transform::Transform;

/// C-ABI signature every layer library must export under the name `gapid2_layer_create`.
///
/// Takes ownership of the raw `Arc<dyn Transform>` pointer for the next transform in the chain
/// (produced by `Arc::into_raw` on this side, reconstructed with `Arc::from_raw` on the layer's
/// side) and an opaque, possibly-null user-config string. Returns an owning raw `Arc<dyn
/// Transform>` pointer for the layer's own transform.
type LayerCreateFn = unsafe extern "C" fn(next: *const dyn Transform, user_config: *const std::os::raw::c_char) -> *const dyn Transform;

/// One loaded layer: the still-open library (kept alive for the process lifetime so the
/// transform's vtable stays valid) and the transform it produced.
struct LoadedLayer {
    #[allow(dead_code)]
    library: Library,
    transform: Arc<dyn Transform>,
}

/// Owns every loaded layer library and the composed transform chain they form.
pub struct Layerer {
    layers: Vec<LoadedLayer>,
    innermost: Arc<dyn Transform>,
}

impl Layerer {
    /// Loads every library in `paths`, in order, splicing each one's transform ahead of
    /// `innermost` (the state-tracker chain). `user_config` is forwarded verbatim to each layer's
    /// init entry point.
    ///
    /// A library that fails to load or export the expected symbol is skipped with a `warn!` --
    /// per the crate's error-handling conventions, a missing or broken user layer degrades
    /// recording rather than aborting the process.
    pub fn load(paths: &[impl AsRef<Path>], innermost: Arc<dyn Transform>, user_config: Option<&str>) -> Self {
        let mut layers = Vec::new();
        let mut next = innermost.clone();

        let config_cstring = user_config.map(|s| std::ffi::CString::new(s).unwrap_or_default());

        for path in paths {
            let path = path.as_ref();
            match Self::load_one(path, next.clone(), config_cstring.as_deref()) {
                Ok(loaded) => {
                    next = loaded.transform.clone();
                    layers.push(loaded);
                }
                Err(err) => {
                    log::warn!("failed to load layer {}: {err:#}", path.display());
                }
            }
        }

        Self { layers, innermost }
    }

    fn load_one(path: &Path, next: Arc<dyn Transform>, user_config: Option<&std::ffi::CStr>) -> anyhow::Result<LoadedLayer> {
        let library = unsafe { Library::new(path) }?;
        let create: Symbol<LayerCreateFn> = unsafe { library.get(b"gapid2_layer_create\0") }?;

        let next_ptr = Arc::into_raw(next);
        let config_ptr = user_config.map(|c| c.as_ptr()).unwrap_or(std::ptr::null());
        let transform_ptr = unsafe { create(next_ptr, config_ptr) };

        if transform_ptr.is_null() {
            anyhow::bail!("gapid2_layer_create returned null");
        }
        let transform = unsafe { Arc::from_raw(transform_ptr) };
        Ok(LoadedLayer { library, transform })
    }

    /// The outermost transform of the loaded layer chain, or `innermost` unchanged if no layer
    /// loaded successfully.
    pub fn outermost(&self) -> Arc<dyn Transform> {
        self.layers.last().map(|l| l.transform.clone()).unwrap_or_else(|| self.innermost.clone())
    }

    pub fn loaded_count(&self) -> usize {
        self.layers.len()
    }
}
