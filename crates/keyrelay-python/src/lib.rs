//! Python bindings for keyrelay via PyO3

use pyo3::exceptions::{PyKeyError, PyNotImplementedError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use keyrelay_core::config::Config as CoreConfig;
use keyrelay_core::keyring::{
    self as core_keyring, BackendType, Item, Keyring as CoreKeyring, KeyringError,
};

fn to_py_err(err: KeyringError) -> PyErr {
    match err {
        KeyringError::KeyNotFound => PyKeyError::new_err(err.to_string()),
        KeyringError::MetadataNotSupported => PyNotImplementedError::new_err(err.to_string()),
        KeyringError::UnsupportedScope(_) | KeyringError::UnknownBackend(_) => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// A keyring opened from the backend registry
#[pyclass]
pub struct Keyring {
    inner: Box<dyn CoreKeyring>,
}

#[pymethods]
impl Keyring {
    /// Open a keyring
    ///
    /// `backend` restricts the registry to one backend; `None` tries all of
    /// them. `config_file` loads a YAML/JSON config (the default location
    /// when omitted), which the keyword arguments then override.
    #[new]
    #[pyo3(signature = (backend=None, scope=None, container_name=None, permission_mask=None, config_file=None))]
    pub fn new(
        backend: Option<&str>,
        scope: Option<&str>,
        container_name: Option<&str>,
        permission_mask: Option<u32>,
        config_file: Option<&str>,
    ) -> PyResult<Self> {
        let mut config = match config_file {
            Some(path) => CoreConfig::from_file(path).map_err(|e| to_py_err(e.into()))?,
            None => CoreConfig::load().map_err(|e| to_py_err(e.into()))?,
        };

        if let Some(name) = backend {
            let backend: BackendType = name.parse().map_err(to_py_err)?;
            config = config.with_allowed_backends(vec![backend]);
        }
        if let Some(scope) = scope {
            config.keyctl.scope = scope.to_string();
        }
        if let Some(name) = container_name {
            config.keyctl.container_name = Some(name.to_string());
        }
        if let Some(mask) = permission_mask {
            config.keyctl.permission_mask = mask;
        }

        let inner = core_keyring::open(&config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    pub fn backend(&self) -> String {
        self.inner.backend().to_string()
    }

    /// Payload of `key`; raises `KeyError` if absent
    pub fn get(&self, py: Python<'_>, key: &str) -> PyResult<Py<PyBytes>> {
        let item = self.inner.get(key).map_err(to_py_err)?;
        Ok(PyBytes::new(py, &item.data).unbind())
    }

    pub fn set(&self, key: &str, data: &[u8]) -> PyResult<()> {
        self.inner.set(Item::new(key, data)).map_err(to_py_err)
    }

    pub fn remove(&self, key: &str) -> PyResult<()> {
        self.inner.remove(key).map_err(to_py_err)
    }

    pub fn keys(&self) -> PyResult<Vec<String>> {
        self.inner.keys().map_err(to_py_err)
    }

    /// Raises `NotImplementedError` on backends without metadata
    pub fn get_metadata(&self, key: &str) -> PyResult<Option<String>> {
        let metadata = self.inner.get_metadata(key).map_err(to_py_err)?;
        Ok(metadata.item.map(|item| item.key))
    }

    fn __contains__(&self, key: &str) -> PyResult<bool> {
        match self.inner.get(key) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(to_py_err(err)),
        }
    }

    fn __repr__(&self) -> String {
        format!("Keyring(backend='{}')", self.inner.backend())
    }
}

// ============================================================================
// Module functions
// ============================================================================

/// Names of the backends available in this build
#[pyfunction]
pub fn list_backends() -> Vec<String> {
    core_keyring::available_backends()
        .into_iter()
        .map(|backend| backend.to_string())
        .collect()
}

#[pyfunction]
pub fn backend_description(name: &str) -> PyResult<Option<String>> {
    let backend: BackendType = name.parse().map_err(to_py_err)?;
    Ok(core_keyring::backend_description(backend))
}

#[pymodule]
fn keyrelay(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Keyring>()?;
    m.add_function(wrap_pyfunction!(list_backends, m)?)?;
    m.add_function(wrap_pyfunction!(backend_description, m)?)?;
    Ok(())
}
