wire_enum! {
    /// 物理量指标。
    ///
    /// 编码与报表服务公共 API 的指标表一致；新增指标只追加，不复用旧编码。
    pub enum Metric: "metric" {
        Unspecified = 0,

        // 直流
        DcVoltage = 1,
        DcCurrent = 2,
        DcPower = 3,

        // 交流通用
        AcFrequency = 10,
        AcVoltage = 11,
        AcVoltagePhase1 = 12,
        AcVoltagePhase2 = 13,
        AcVoltagePhase3 = 14,
        AcApparentCurrent = 15,
        AcApparentCurrentPhase1 = 16,
        AcApparentCurrentPhase2 = 17,
        AcApparentCurrentPhase3 = 18,

        // 交流功率
        AcApparentPower = 20,
        AcApparentPowerPhase1 = 21,
        AcApparentPowerPhase2 = 22,
        AcApparentPowerPhase3 = 23,
        AcActivePower = 24,
        AcActivePowerPhase1 = 25,
        AcActivePowerPhase2 = 26,
        AcActivePowerPhase3 = 27,
        AcReactivePower = 28,
        AcReactivePowerPhase1 = 29,
        AcReactivePowerPhase2 = 30,
        AcReactivePowerPhase3 = 31,

        // 功率因数
        AcPowerFactor = 40,
        AcPowerFactorPhase1 = 41,
        AcPowerFactorPhase2 = 42,
        AcPowerFactorPhase3 = 43,

        // 交流电能
        AcApparentEnergy = 50,
        AcApparentEnergyPhase1 = 51,
        AcApparentEnergyPhase2 = 52,
        AcApparentEnergyPhase3 = 53,
        AcActiveEnergy = 54,
        AcActiveEnergyPhase1 = 55,
        AcActiveEnergyPhase2 = 56,
        AcActiveEnergyPhase3 = 57,
        AcActiveEnergyConsumed = 58,
        AcActiveEnergyConsumedPhase1 = 59,
        AcActiveEnergyConsumedPhase2 = 60,
        AcActiveEnergyConsumedPhase3 = 61,
        AcActiveEnergyDelivered = 62,
        AcActiveEnergyDeliveredPhase1 = 63,
        AcActiveEnergyDeliveredPhase2 = 64,
        AcActiveEnergyDeliveredPhase3 = 65,
        AcReactiveEnergy = 66,
        AcReactiveEnergyPhase1 = 67,
        AcReactiveEnergyPhase2 = 68,
        AcReactiveEnergyPhase3 = 69,

        // 谐波
        AcThdCurrent = 80,
        AcThdCurrentPhase1 = 81,
        AcThdCurrentPhase2 = 82,
        AcThdCurrentPhase3 = 83,

        // 电池管理
        BatteryCapacity = 101,
        BatterySocPct = 102,
        BatteryTemperature = 103,

        InverterTemperature = 120,

        EvChargingTemperature = 140,

        // 环境传感器
        SensorWindSpeed = 160,
        SensorWindDirection = 162,
        SensorTemperature = 163,
        SensorRelativeHumidity = 164,
        SensorDewPoint = 165,
        SensorAirPressure = 166,
        SensorIrradiance = 167,
    }
}

impl Metric {
    /// 按线协议编码排序并去重。
    pub fn normalize_list(metrics: &[Metric]) -> Vec<Metric> {
        let mut out = metrics.to_vec();
        out.sort_by_key(|metric| metric.code());
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Metric;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Metric::DcPower.code(), 3);
        assert_eq!(Metric::AcActivePower.code(), 24);
        assert_eq!(Metric::try_from_code(102), Some(Metric::BatterySocPct));
    }

    #[test]
    fn unknown_code_decodes_to_unspecified() {
        assert_eq!(Metric::try_from_code(9999), None);
        assert_eq!(Metric::from_code(9999), Metric::Unspecified);
    }

    #[test]
    fn normalize_list_sorts_and_dedups() {
        let list = Metric::normalize_list(&[
            Metric::AcActivePower,
            Metric::DcPower,
            Metric::AcActivePower,
        ]);
        assert_eq!(list, vec![Metric::DcPower, Metric::AcActivePower]);
    }
}
