//! In-memory `SqlClient` used by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use crate::client::{QueryError, Row, SqlClient};
use crate::dialect::Dialect;

/// Records every statement and answers `fetch` from scripted responses,
/// matched by SQL substring in registration order.
pub struct RecordingClient {
    dialect: Dialect,
    responses: Mutex<Vec<(String, Vec<Row>)>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    affected: Mutex<u64>,
    inserted_key: Mutex<Option<Value>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl RecordingClient {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            affected: Mutex::new(1),
            inserted_key: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, sql_fragment: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.responses
            .lock()
            .unwrap()
            .push((sql_fragment.to_string(), rows));
    }

    pub fn set_affected(&self, n: u64) {
        *self.affected.lock().unwrap() = n;
    }

    pub fn set_inserted_key(&self, key: Option<Value>) {
        *self.inserted_key.lock().unwrap() = key;
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> (String, Vec<Value>) {
        self.calls().pop().unwrap_or_default()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait::async_trait]
impl SqlClient for RecordingClient {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self) -> Result<(), QueryError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QueryError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueryError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        self.record(sql, params);
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError> {
        self.record(sql, params);
        Ok(*self.affected.lock().unwrap())
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<Value>, QueryError> {
        self.record(sql, params);
        Ok(self.inserted_key.lock().unwrap().clone())
    }
}
