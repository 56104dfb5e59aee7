//! Metric alarms over Smithy `rpcv2Cbor`
//! (`POST /service/GraniteServiceVersion20100801/operation/<Operation>`).
//!
//! Alarms are keyed by name. `PutMetricAlarm` replaces the configuration of
//! an existing alarm but keeps its state; the state only changes through
//! `SetAlarmState`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use mockstack_core::{Params, Resource, ResourceScope, ResourceStore, Value};
use mockstack_protocol::{
    Call, ErrorCodes, ErrorKind, Output, ProtocolMock, Provider, RpcV2CborCodec, ServiceError,
};
use tracing::info;

/// Smithy service shape name used in request paths.
pub const SERVICE_NAME: &str = "GraniteServiceVersion20100801";

/// Error type namespace.
pub const NAMESPACE: &str = "com.amazonaws.cloudwatch";

const MAX_RECORDS: i64 = 100;

const COMPARISON_OPERATORS: [&str; 7] = [
    "GreaterThanOrEqualToThreshold",
    "GreaterThanThreshold",
    "LessThanThreshold",
    "LessThanOrEqualToThreshold",
    "LessThanLowerOrGreaterThanUpperThreshold",
    "LessThanLowerThreshold",
    "GreaterThanUpperThreshold",
];

static ERROR_CODES: ErrorCodes = ErrorCodes {
    validation: "InvalidParameterValue",
    not_found: "ResourceNotFound",
    not_found_status: StatusCode::NOT_FOUND,
    ..ErrorCodes::DEFAULT
};

/// Alarm state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    /// Metric within threshold.
    Ok,
    /// Threshold breached.
    Alarm,
    /// Not enough data; the initial state.
    InsufficientData,
}

impl AlarmState {
    fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "OK" => Ok(Self::Ok),
            "ALARM" => Ok(Self::Alarm),
            "INSUFFICIENT_DATA" => Ok(Self::InsufficientData),
            other => Err(ServiceError::validation(format!(
                "Invalid StateValue {other}, must be one of OK, ALARM, INSUFFICIENT_DATA"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Alarm => "ALARM",
            Self::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

/// A metric alarm.
#[derive(Debug, Clone)]
pub struct MetricAlarm {
    /// Alarm name; also the store id.
    pub name: String,
    /// ARN.
    pub arn: String,
    /// Alarm configuration as sent, minus the name.
    pub config: Params,
    /// Current state.
    pub state: AlarmState,
    /// Reason for the current state.
    pub state_reason: String,
    /// Machine-readable state reason, if any.
    pub state_reason_data: Option<String>,
    /// When the state last changed.
    pub state_updated: DateTime<Utc>,
    /// When the configuration last changed.
    pub configuration_updated: DateTime<Utc>,
}

impl Resource for MetricAlarm {
    const KIND: &'static str = "Alarm";

    fn name(&self) -> &str {
        &self.name
    }
}

impl MetricAlarm {
    fn to_params(&self) -> Params {
        let mut out = self.config.clone();
        out.set("AlarmName", self.name.as_str())
            .set("AlarmArn", self.arn.as_str())
            .set("StateValue", self.state.as_str())
            .set("StateReason", self.state_reason.as_str())
            .set("StateReasonData", self.state_reason_data.as_deref())
            .set("StateUpdatedTimestamp", self.state_updated)
            .set("AlarmConfigurationUpdatedTimestamp", self.configuration_updated);
        out
    }
}

/// Fields copied from `PutMetricAlarm` into the stored configuration.
const CONFIG_FIELDS: [&str; 18] = [
    "AlarmDescription",
    "ActionsEnabled",
    "OKActions",
    "AlarmActions",
    "InsufficientDataActions",
    "MetricName",
    "Namespace",
    "Statistic",
    "ExtendedStatistic",
    "Dimensions",
    "Period",
    "Unit",
    "EvaluationPeriods",
    "DatapointsToAlarm",
    "Threshold",
    "ComparisonOperator",
    "TreatMissingData",
    "Metrics",
];

fn alarm_config(params: &Params) -> Result<Params, ServiceError> {
    let evaluation_periods = params.require_i64("EvaluationPeriods")?;
    if evaluation_periods < 1 {
        return Err(ServiceError::validation(
            "EvaluationPeriods must be greater than or equal to 1",
        ));
    }
    let operator = params.require_str("ComparisonOperator")?;
    if !COMPARISON_OPERATORS.contains(&operator) {
        return Err(ServiceError::validation(format!(
            "Invalid ComparisonOperator {operator}"
        )));
    }
    if params.opt_i64("Period")?.is_some_and(|period| period < 1) {
        return Err(ServiceError::validation("Period must be greater than 0"));
    }

    let mut config: Params = CONFIG_FIELDS
        .iter()
        .filter_map(|field| params.get(field).map(|v| ((*field).to_owned(), v.clone())))
        .collect();
    config.set("EvaluationPeriods", evaluation_periods);
    if !config.contains("ActionsEnabled") {
        config.set("ActionsEnabled", true);
    }
    if !config.contains("TreatMissingData") {
        config.set("TreatMissingData", "missing");
    }
    for list in ["OKActions", "AlarmActions", "InsufficientDataActions", "Dimensions"] {
        if !config.contains(list) {
            config.set(list, Vec::<Value>::new());
        }
    }
    Ok(config)
}

/// The CloudWatch alarms provider.
#[derive(Debug)]
pub struct MonitoringProvider {
    alarms: ResourceStore<MetricAlarm>,
    scope: ResourceScope,
}

impl MonitoringProvider {
    /// Create a provider with no alarms.
    #[must_use]
    pub fn new(scope: ResourceScope) -> Self {
        Self {
            alarms: ResourceStore::new(),
            scope,
        }
    }

    /// Handle `PutMetricAlarm`.
    fn handle_put_metric_alarm(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("AlarmName")?;
        if name.is_empty() || name.len() > 255 {
            return Err(ServiceError::validation(
                "AlarmName must be between 1 and 255 characters",
            ));
        }
        let config = alarm_config(params)?;
        let now = Utc::now();
        let alarm = MetricAlarm {
            name: name.to_owned(),
            arn: self.scope.arn("cloudwatch", &format!("alarm:{name}")),
            config,
            state: AlarmState::InsufficientData,
            state_reason: "Unchecked: Initial alarm creation".to_owned(),
            state_reason_data: None,
            state_updated: now,
            configuration_updated: now,
        };

        let (_, created) = self.alarms.upsert(
            alarm,
            || name.to_owned(),
            |existing, incoming| {
                existing.config = incoming.config;
                existing.configuration_updated = incoming.configuration_updated;
            },
        );
        if created {
            info!(alarm = %name, "created metric alarm");
        }
        Ok(Params::new())
    }

    /// Handle `DescribeAlarms`.
    fn handle_describe_alarms(&self, params: &Params) -> Result<Params, ServiceError> {
        let names = params.string_list("AlarmNames")?;
        let prefix = params.str("AlarmNamePrefix");
        if !names.is_empty() && prefix.is_some() {
            return Err(ServiceError::new(
                ErrorKind::Validation,
                "InvalidParameterCombination",
                "AlarmNames and AlarmNamePrefix cannot be specified together",
            ));
        }
        let state = params.str("StateValue").map(AlarmState::parse).transpose()?;
        let max = params.i64_or("MaxRecords", MAX_RECORDS)?;
        if !(1..=MAX_RECORDS).contains(&max) {
            return Err(ServiceError::validation(format!(
                "MaxRecords must be between 1 and {MAX_RECORDS}"
            )));
        }

        let page = self.alarms.page(
            |alarm| {
                (names.is_empty() || names.contains(&alarm.name))
                    && prefix.is_none_or(|p| alarm.name.starts_with(p))
                    && state.is_none_or(|s| alarm.state == s)
            },
            usize::try_from(max).unwrap_or(1),
            params.str("NextToken"),
        )?;
        let alarms: Vec<Value> = page.items.iter().map(|r| r.value.to_params().into()).collect();
        Ok(Params::new()
            .with("MetricAlarms", alarms)
            .with("CompositeAlarms", Vec::<Value>::new())
            .with("NextToken", page.next_token))
    }

    /// Handle `DeleteAlarms`. Fails without deleting anything if any name
    /// is unknown.
    fn handle_delete_alarms(&self, params: &Params) -> Result<Params, ServiceError> {
        let names = params.string_list("AlarmNames")?;
        if let Some(missing) = names.iter().find(|n| self.alarms.get(n).is_none()) {
            return Err(ServiceError::not_found(format!(
                "{missing} alarm does not exist"
            )));
        }
        for name in &names {
            if self.alarms.delete(name, None).is_ok() {
                info!(alarm = %name, "deleted metric alarm");
            }
        }
        Ok(Params::new())
    }

    /// Handle `SetAlarmState`.
    fn handle_set_alarm_state(&self, params: &Params) -> Result<Params, ServiceError> {
        let name = params.require_str("AlarmName")?;
        let state = AlarmState::parse(params.require_str("StateValue")?)?;
        let reason = params.require_str("StateReason")?;
        let reason_data = params.str("StateReasonData");

        self.alarms.update(name, None, |alarm: &mut MetricAlarm| {
            alarm.state = state;
            alarm.state_reason = reason.to_owned();
            alarm.state_reason_data = reason_data.map(str::to_owned);
            alarm.state_updated = Utc::now();
            Ok::<_, ServiceError>(())
        })?;
        Ok(Params::new())
    }
}

impl Provider for MonitoringProvider {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    fn error_codes(&self) -> &'static ErrorCodes {
        &ERROR_CODES
    }

    fn dispatch(&self, call: Call) -> Result<Output, ServiceError> {
        let params = &call.params;
        let result = match call.operation.as_str() {
            "PutMetricAlarm" => self.handle_put_metric_alarm(params),
            "DescribeAlarms" => self.handle_describe_alarms(params),
            "DeleteAlarms" => self.handle_delete_alarms(params),
            "SetAlarmState" => self.handle_set_alarm_state(params),
            other => Err(ServiceError::unsupported_operation(other)),
        };
        result.map(Output::new)
    }

    fn reset(&self) {
        self.alarms.reset();
    }
}

/// The CloudWatch alarms service mock.
#[must_use]
pub fn mock(scope: &ResourceScope) -> Arc<ProtocolMock<MonitoringProvider>> {
    Arc::new(ProtocolMock::new(
        MonitoringProvider::new(scope.clone()),
        RpcV2CborCodec::new(NAMESPACE),
    ))
}
