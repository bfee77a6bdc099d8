//! `s3_flush` Python module (built with `--features python`).

use std::env;
use std::process::exit;

use pyo3::prelude::PyModule;
use pyo3::{PyAny, PyResult, Python, prelude as pyo, pymethods};

use crate::config::Config;
use crate::drain::{DrainReport, drain};
use crate::helpers::{UnwrapIntoPythonError, future_pyresult_to_py};

#[pymethods]
impl DrainReport {
    #[getter]
    pub fn total(&self) -> usize {
        self.deleted()
    }

    pub fn __str__(&self) -> String {
        format!("<s3_flush.DrainReport object at {self:p}>")
    }

    pub fn __repr__(&self) -> String {
        format!("<{self:#?}>")
    }
}

async fn async_main_rs() -> anyhow::Result<i32> {
    // skip first (`python s3_flush subcommand` -> `s3_flush subcommand`):
    let exit_code = crate::run(env::args_os().skip(1)).await;

    exit(exit_code);
}

async fn flush_bucket_async(bucket: Option<String>) -> PyResult<DrainReport> {
    let config = Config::guess().unwrap_or_raise()?;
    let bucket = config.bucket_or(&bucket).unwrap_or_raise()?;

    let store = config.into_store().await.unwrap_or_raise()?;

    drain(&store, &bucket)
        .await
        .map_err(anyhow::Error::from)
        .unwrap_or_raise()
}

#[pyo::pyfunction]
pub fn main_rs(py: Python<'_>) -> PyResult<&PyAny> {
    // python has no RUST_LOG setup of its own, a second call is a no-op
    let _ = env_logger::try_init();

    pyo3_asyncio::tokio::future_into_py(py, async {
        // result is Ok(exit code) or Err(python error)
        async_main_rs().await.unwrap_or_raise()
    })
}

/// Empty `bucket` (defaults to `S3_BUCKET`); resolves to a `DrainReport`.
#[pyo::pyfunction]
#[pyo3(name = "flush_bucket", signature = (bucket = None))]
pub fn py_flush_bucket(
    py: Python<'_>,
    bucket: Option<String>,
) -> PyResult<&PyAny> {
    let _ = env_logger::try_init();

    future_pyresult_to_py(py, flush_bucket_async(bucket))
}

#[pyo::pymodule]
pub fn s3_flush(
    _py: Python,
    m: &PyModule,
) -> PyResult<()> {
    m.add_class::<DrainReport>()?;

    m.add_function(pyo::wrap_pyfunction!(main_rs, m)?)?;
    m.add_function(pyo::wrap_pyfunction!(py_flush_bucket, m)?)?;
    Ok(())
}
