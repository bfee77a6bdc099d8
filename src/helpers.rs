use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Render an error and its causes for the terminal.
pub fn fmt_error(err: &anyhow::Error) -> String {
    let mut msg = format!("{} {err}", "Error:".red().bold());

    for cause in err.chain().skip(1) {
        msg.push_str(&format!("\n  {} {cause}", "caused by:".yellow()));
    }

    msg
}

pub fn print_table<T: Tabled>(rows: &[T]) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());

    println!("{table}");
}

// https://users.rust-lang.org/t/is-there-a-simple-way-to-give-a-default-string-if-the-string-variable-is-empty/100411

pub trait StringExt {
    fn or(
        self,
        dflt: &str,
    ) -> String;
}

impl<S: Into<String>> StringExt for S {
    fn or(
        self,
        dflt: &str,
    ) -> String {
        // Re-use a `String`s capacity, maybe
        let mut s = self.into();
        if s.is_empty() {
            s.push_str(dflt);
        }
        s
    }
}

#[cfg(feature = "python")]
pub use python::*;

#[cfg(feature = "python")]
mod python {
    use std::future::Future;

    use pyo3::exceptions::PyRuntimeError;
    use pyo3::{IntoPy, PyAny, PyErr, PyObject, PyResult, Python};

    pub fn future_pyresult_to_py<
        T: IntoPy<PyObject> + Send + 'static,
        E: Into<PyErr> + Send + 'static,
    >(
        py: Python<'_>,
        future: impl Future<Output = Result<T, E>> + Send + 'static,
    ) -> PyResult<&'_ PyAny> {
        pyo3_asyncio::tokio::future_into_py(py, async move {
            match future.await {
                Ok(obj) => Python::with_gil(|py| Ok(obj.into_py(py))),
                Err(exc) => Python::with_gil(|_py| Err(exc.into())),
            }
        })
    }

    pub trait UnwrapIntoPythonError<T> {
        fn unwrap_or_raise(self) -> PyResult<T>;
    }

    impl<T> UnwrapIntoPythonError<T> for anyhow::Result<T> {
        fn unwrap_or_raise(self) -> PyResult<T> {
            // `{:#}` keeps the cause chain on one line
            self.map_err(|err| PyRuntimeError::new_err(format!("{err:#}")))
        }
    }
}
