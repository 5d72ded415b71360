//! Recording driver used by unit tests

use crate::binder::{escape_string, Escape};
use crate::driver::{Connect, Driver, Outcome, Row};
use crate::{ConnectionConfig, Error, Params, Result};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    calls: Vec<(String, Params)>,
    responses: Vec<(String, Vec<Row>)>,
    failures: Vec<String>,
    next_insert_id: u64,
    rows_affected: u64,
}

/// Records every statement and serves queued rows.
///
/// Queued rows are returned once, to the first fetch whose SQL contains the
/// registered pattern. Clones share state.
#[derive(Debug, Clone)]
pub struct RecordingDriver {
    state: Arc<Mutex<State>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_insert_id: 1,
                rows_affected: 1,
                ..State::default()
            })),
        }
    }

    /// Serve `rows` to the next fetch containing `pattern`
    pub fn on_fetch(&self, pattern: &str, rows: Vec<Row>) -> &Self {
        self.state.lock().unwrap().responses.push((pattern.to_string(), rows));
        self
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(&self, pattern: &str) -> &Self {
        self.state.lock().unwrap().failures.push(pattern.to_string());
        self
    }

    pub fn set_rows_affected(&self, rows: u64) {
        self.state.lock().unwrap().rows_affected = rows;
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Params)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn last(&self) -> Option<(String, Params)> {
        self.state.lock().unwrap().calls.last().cloned()
    }

    /// Number of recorded statements starting with `prefix`
    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.statements().iter().filter(|sql| sql.starts_with(prefix)).count()
    }

    fn record(&self, sql: &str, params: &Params) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((sql.to_string(), params.clone()));
        if state.failures.iter().any(|pattern| sql.contains(pattern.as_str())) {
            return Err(Error::invalid_query(sql, "simulated failure"));
        }
        Ok(())
    }
}

impl Escape for RecordingDriver {
    fn escape(&self, input: &str) -> String {
        escape_string(input)
    }
}

impl Driver for RecordingDriver {
    async fn execute(&self, sql: &str, params: &Params) -> Result<Outcome> {
        self.record(sql, params)?;
        let mut state = self.state.lock().unwrap();
        let outcome = Outcome {
            rows_affected: state.rows_affected,
            last_insert_id: state.next_insert_id,
        };
        if sql.starts_with("INSERT") {
            state.next_insert_id += 1;
        }
        Ok(outcome)
    }

    async fn fetch_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        let mut state = self.state.lock().unwrap();
        match state.responses.iter().position(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some(idx) => Ok(state.responses.remove(idx).1),
            None => Ok(Vec::new()),
        }
    }
}

impl Connect for RecordingDriver {
    const NAME: &'static str = "mysql";

    async fn connect(_config: &ConnectionConfig) -> Result<Self> {
        Ok(Self::new())
    }
}
