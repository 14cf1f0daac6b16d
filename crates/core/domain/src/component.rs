use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

wire_enum! {
    /// 组件运行状态。
    pub enum ComponentStateCode: "component_state" {
        Unspecified = 0,
        Unknown = 1,
        Unavailable = 2,
        SwitchingOff = 3,
        Off = 4,
        SwitchingOn = 5,
        Standby = 6,
        Ready = 7,
        Charging = 8,
        Discharging = 9,
        Error = 10,
        EvChargingCableUnplugged = 20,
        EvChargingCablePluggedAtStation = 21,
        EvChargingCablePluggedAtEv = 22,
        EvChargingCableLockedAtStation = 23,
        EvChargingCableLockedAtEv = 24,
        RelayOpen = 30,
        RelayClosed = 31,
        PrechargerOpen = 40,
        PrechargerPrecharging = 41,
        PrechargerClosed = 42,
    }
}

wire_enum! {
    /// 组件告警/错误编码（告警与错误共用同一编码表）。
    pub enum ComponentErrorCode: "component_error" {
        Unspecified = 0,
        Unknown = 1,
        SwitchOnFault = 2,
        Undervoltage = 3,
        Overvoltage = 4,
        Overcurrent = 5,
        OvercurrentCharging = 6,
        OvercurrentDischarging = 7,
        Overtemperature = 8,
        Undertemperature = 9,
        HighHumidity = 10,
        FuseError = 11,
        PrechargeError = 12,
        PlausibilityError = 13,
        UndervoltageShutdown = 14,
        EvUnexpectedPilotFailure = 15,
        FaultCurrent = 16,
        ShortCircuit = 17,
        ConfigError = 18,
        IllegalComponentStateCodeRequested = 19,
        HardwareInaccessible = 20,
        Internal = 21,
        Unauthorized = 22,
        EvChargingCableUnpluggedFromStation = 40,
        EvChargingCableUnpluggedFromEv = 41,
        EvChargingCableLockFailed = 42,
        EvChargingCableInvalid = 43,
        EvConsumerIncompatible = 44,
        BatteryImbalance = 50,
        BatteryLowSoh = 51,
        BatteryBlockError = 52,
        BatteryControllerError = 53,
        BatteryRelayError = 54,
        BatteryCalibrationNeeded = 56,
        RelayCycleLimitReached = 60,
    }
}

/// 某一时刻的组件状态快照。
///
/// 三个列表都是集合语义：构造时去重，保留首次出现的顺序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentState {
    timestamp: DateTime<Utc>,
    states: Vec<ComponentStateCode>,
    warnings: Vec<ComponentErrorCode>,
    errors: Vec<ComponentErrorCode>,
}

impl ComponentState {
    pub fn new(
        timestamp: DateTime<Utc>,
        states: impl IntoIterator<Item = ComponentStateCode>,
        warnings: impl IntoIterator<Item = ComponentErrorCode>,
        errors: impl IntoIterator<Item = ComponentErrorCode>,
    ) -> Self {
        Self {
            timestamp,
            states: unique_in_order(states),
            warnings: unique_in_order(warnings),
            errors: unique_in_order(errors),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn states(&self) -> &[ComponentStateCode] {
        &self.states
    }

    pub fn warnings(&self) -> &[ComponentErrorCode] {
        &self.warnings
    }

    pub fn errors(&self) -> &[ComponentErrorCode] {
        &self.errors
    }

    /// 存在错误编码即视为错误状态。
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_parts(
        self,
    ) -> (
        DateTime<Utc>,
        Vec<ComponentStateCode>,
        Vec<ComponentErrorCode>,
        Vec<ComponentErrorCode>,
    ) {
        (self.timestamp, self.states, self.warnings, self.errors)
    }
}

/// 去重并保留首次出现顺序。
pub fn unique_in_order<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn state_lists_are_deduplicated_in_order() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let state = ComponentState::new(
            ts,
            [ComponentStateCode::Ready, ComponentStateCode::Ready],
            [],
            [
                ComponentErrorCode::Overvoltage,
                ComponentErrorCode::Overvoltage,
                ComponentErrorCode::FuseError,
            ],
        );
        assert_eq!(state.states(), &[ComponentStateCode::Ready]);
        assert_eq!(
            state.errors(),
            &[ComponentErrorCode::Overvoltage, ComponentErrorCode::FuseError]
        );
        assert!(state.is_error());
    }

    #[test]
    fn unknown_state_code_decodes_to_unspecified() {
        assert_eq!(
            ComponentStateCode::from_code(77),
            ComponentStateCode::Unspecified
        );
        assert_eq!(
            ComponentErrorCode::from_code(60),
            ComponentErrorCode::RelayCycleLimitReached
        );
    }
}
