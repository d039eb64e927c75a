//! One scraped event merged onto the parameters of its experiment.

use serde::{Deserialize, Serialize};

use crate::params::{ParamSet, ParamValue};

/// Key under which every record carries its timestamp in milliseconds.
pub const TIME_KEY: &str = "time";

/// One extracted log event merged onto its experiment's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    params: ParamSet,
}

impl Record {
    /// Merges `fields` onto `experiment`; extracted fields win.
    pub fn new(experiment: &ParamSet, fields: &ParamSet) -> Self {
        Self {
            params: experiment.merge(fields),
        }
    }

    pub fn time_ms(&self) -> Option<i64> {
        self.params.get(TIME_KEY).and_then(ParamValue::as_i64)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn into_params(self) -> ParamSet {
        self.params
    }
}

impl From<ParamSet> for Record {
    fn from(params: ParamSet) -> Self {
        Self { params }
    }
}
