//! Pure mapping from a device snapshot to metric observations.
//!
//! All unit conversions live here:
//!
//! - temperatures: the device reports Fahrenheit, exported as Celsius
//! - frequencies: the device reports Hz, passed through unchanged
//! - power levels: the device reports dBmV, passed through unchanged
//! - upstream symbol rate: reported in ksym/s, passed through unchanged
//! - uptime: reported as `36day(s)15h:24m:58s`, exported as seconds
//!
//! The same snapshot always maps to the same observation sequence; there is
//! no I/O and no hidden state. Observations are emitted grouped by metric
//! name so the rendered exposition has one `# TYPE` block per metric.

use tracing::warn;

use crate::snapshot::{DeviceSnapshot, LanClient};

/// Prometheus metric type of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    /// The `# TYPE` comment string in the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// One sample: name, type, ordered labels, value. Produced by
/// [`map_snapshot`], consumed by the renderer, never retained across scrapes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricObservation {
    pub name: &'static str,
    pub kind: MetricKind,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl MetricObservation {
    pub fn gauge(name: &'static str, labels: Vec<(&'static str, String)>, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            labels,
            value,
        }
    }

    pub fn counter(name: &'static str, labels: Vec<(&'static str, String)>, value: f64) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            labels,
            value,
        }
    }
}

/// Provisioning states the firmware is known to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Online,
    PartialServiceUs,
    PartialServiceDs,
    PartialServiceUsDs,
    ModemMode,
    DsScanning,
    UsScanning,
    UsRanging,
    DsRanging,
    RequestingCmIpAddress,
    /// Fallback for states future firmware may add.
    Unknown,
}

impl ProvisioningStatus {
    pub const ALL: [ProvisioningStatus; 11] = [
        ProvisioningStatus::Online,
        ProvisioningStatus::PartialServiceUs,
        ProvisioningStatus::PartialServiceDs,
        ProvisioningStatus::PartialServiceUsDs,
        ProvisioningStatus::ModemMode,
        ProvisioningStatus::DsScanning,
        ProvisioningStatus::UsScanning,
        ProvisioningStatus::UsRanging,
        ProvisioningStatus::DsRanging,
        ProvisioningStatus::RequestingCmIpAddress,
        ProvisioningStatus::Unknown,
    ];

    /// The state string as the firmware spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Online => "Online",
            ProvisioningStatus::PartialServiceUs => "Partial Service (US only)",
            ProvisioningStatus::PartialServiceDs => "Partial Service (DS only)",
            ProvisioningStatus::PartialServiceUsDs => "Partial Service (US+DS)",
            ProvisioningStatus::ModemMode => "Modem Mode",
            ProvisioningStatus::DsScanning => "DS scanning",
            ProvisioningStatus::UsScanning => "US scanning",
            ProvisioningStatus::UsRanging => "US ranging",
            ProvisioningStatus::DsRanging => "DS ranging",
            ProvisioningStatus::RequestingCmIpAddress => "Requesting CM IP address",
            ProvisioningStatus::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == raw)
            .unwrap_or(ProvisioningStatus::Unknown)
    }
}

/// Map one snapshot to its observation sequence.
///
/// `source` is the modem's configured address and becomes the first label on
/// every observation. The orchestrator's up/duration gauges are not part of
/// the mapped set; they are appended by the caller.
pub fn map_snapshot(snapshot: &DeviceSnapshot, source: &str) -> Vec<MetricObservation> {
    let mut out = Vec::new();

    if let Some(info) = &snapshot.device_info {
        // A label value is the reported string or "unknown"; CmProvisionMode
        // in particular is absent while the modem is DS scanning.
        let label = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        out.push(MetricObservation::gauge(
            "connectbox_device_info",
            vec![
                ("source", source.to_string()),
                ("hardware_version", label(&info.hardware_version)),
                ("firmware_version", label(&info.firmware_version)),
                ("docsis_mode", label(&info.docsis_mode)),
                ("cm_provision_mode", label(&info.cm_provision_mode)),
                ("gw_provision_mode", label(&info.gw_provision_mode)),
                ("cable_modem_status", label(&info.cable_modem_status)),
                ("operator_id", label(&info.operator_id)),
            ],
            1.0,
        ));

        if let Some(raw) = &info.provisioning_status {
            let current = ProvisioningStatus::parse(raw);
            if current == ProvisioningStatus::Unknown {
                warn!(source, status = %raw, "Unknown provisioning status");
            }
            for state in ProvisioningStatus::ALL {
                out.push(MetricObservation::gauge(
                    "connectbox_provisioning_status",
                    vec![
                        ("source", source.to_string()),
                        ("status", state.as_str().to_string()),
                    ],
                    if state == current { 1.0 } else { 0.0 },
                ));
            }
        }

        if let Some(raw) = &info.uptime {
            match parse_uptime_seconds(raw) {
                Some(seconds) => out.push(MetricObservation::counter(
                    "connectbox_uptime_seconds_total",
                    vec![("source", source.to_string())],
                    seconds as f64,
                )),
                None => warn!(source, uptime = %raw, "Unexpected uptime format"),
            }
        }
    }

    if let Some(reading) = &snapshot.temperature {
        if let Some(f) = reading.tuner_fahrenheit {
            out.push(MetricObservation::gauge(
                "connectbox_tuner_temperature_celsius",
                vec![("source", source.to_string())],
                fahrenheit_to_celsius(f),
            ));
        }
        if let Some(f) = reading.board_fahrenheit {
            out.push(MetricObservation::gauge(
                "connectbox_temperature_celsius",
                vec![("source", source.to_string())],
                fahrenheit_to_celsius(f),
            ));
        }
    }

    map_downstream(snapshot, source, &mut out);
    map_upstream(snapshot, source, &mut out);

    if let Some(clients) = &snapshot.lan_clients {
        map_clients(
            "connectbox_ethernet_client_speed_mbit",
            &clients.ethernet,
            source,
            &mut out,
        );
        map_clients(
            "connectbox_wifi_client_speed_mbit",
            &clients.wifi,
            source,
            &mut out,
        );
    }

    out
}

fn map_downstream(snapshot: &DeviceSnapshot, source: &str, out: &mut Vec<MetricObservation>) {
    // Unused slots are skipped entirely; a present zero reading is emitted.
    let live: Vec<_> = snapshot
        .downstream
        .iter()
        .filter(|ch| !ch.is_unused())
        .collect();

    let labels = |id: &str| {
        vec![
            ("source", source.to_string()),
            ("channel_id", format_channel_id(id)),
        ]
    };

    for ch in &live {
        if let Some(v) = ch.frequency_hz {
            out.push(MetricObservation::gauge(
                "connectbox_downstream_frequency_hz",
                labels(&ch.channel_id),
                v as f64,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.power_dbmv {
            out.push(MetricObservation::gauge(
                "connectbox_downstream_power_level_dbmv",
                labels(&ch.channel_id),
                v,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.snr_db {
            out.push(MetricObservation::gauge(
                "connectbox_downstream_snr_db",
                labels(&ch.channel_id),
                v,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.rxmer_db {
            out.push(MetricObservation::gauge(
                "connectbox_downstream_rxmer_db",
                labels(&ch.channel_id),
                v,
            ));
        }
    }
    for ch in &live {
        if let Some(locked) = ch.locked {
            out.push(MetricObservation::gauge(
                "connectbox_downstream_locked",
                labels(&ch.channel_id),
                if locked { 1.0 } else { 0.0 },
            ));
        }
    }
    for ch in &live {
        // Modulation is an enumerated string; exported as a label rather
        // than a numeric code.
        if let Some(modulation) = &ch.modulation {
            let mut l = labels(&ch.channel_id);
            l.push(("modulation", modulation.clone()));
            out.push(MetricObservation::gauge(
                "connectbox_downstream_modulation_info",
                l,
                1.0,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.codewords_unerrored {
            out.push(MetricObservation::counter(
                "connectbox_downstream_codewords_unerrored_total",
                labels(&ch.channel_id),
                v as f64,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.codewords_corrected {
            out.push(MetricObservation::counter(
                "connectbox_downstream_codewords_corrected_total",
                labels(&ch.channel_id),
                v as f64,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.codewords_uncorrectable {
            out.push(MetricObservation::counter(
                "connectbox_downstream_codewords_uncorrectable_total",
                labels(&ch.channel_id),
                v as f64,
            ));
        }
    }
}

fn map_upstream(snapshot: &DeviceSnapshot, source: &str, out: &mut Vec<MetricObservation>) {
    let live: Vec<_> = snapshot
        .upstream
        .iter()
        .filter(|ch| !ch.is_unused())
        .collect();

    let labels = |id: &str| {
        vec![
            ("source", source.to_string()),
            ("channel_id", format_channel_id(id)),
        ]
    };

    for ch in &live {
        if let Some(v) = ch.frequency_hz {
            out.push(MetricObservation::gauge(
                "connectbox_upstream_frequency_hz",
                labels(&ch.channel_id),
                v as f64,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.power_dbmv {
            out.push(MetricObservation::gauge(
                "connectbox_upstream_power_level_dbmv",
                labels(&ch.channel_id),
                v,
            ));
        }
    }
    for ch in &live {
        if let Some(v) = ch.symbol_rate_ksps {
            out.push(MetricObservation::gauge(
                "connectbox_upstream_symbol_rate_ksps",
                labels(&ch.channel_id),
                v,
            ));
        }
    }
    for ch in &live {
        if let Some(modulation) = &ch.modulation {
            let mut l = labels(&ch.channel_id);
            l.push(("modulation", modulation.clone()));
            out.push(MetricObservation::gauge(
                "connectbox_upstream_modulation_info",
                l,
                1.0,
            ));
        }
    }
    for ch in &live {
        let timeouts = [
            ("T1", ch.t1_timeouts),
            ("T2", ch.t2_timeouts),
            ("T3", ch.t3_timeouts),
            ("T4", ch.t4_timeouts),
        ];
        for (timeout_type, count) in timeouts {
            if let Some(v) = count {
                let mut l = labels(&ch.channel_id);
                l.push(("timeout_type", timeout_type.to_string()));
                out.push(MetricObservation::counter(
                    "connectbox_upstream_timeouts_total",
                    l,
                    v as f64,
                ));
            }
        }
    }
}

fn map_clients(
    name: &'static str,
    clients: &[LanClient],
    source: &str,
    out: &mut Vec<MetricObservation>,
) {
    for client in clients {
        let Some(speed) = client.speed_mbit else {
            continue;
        };
        // Firmware-dependent: either or both addresses may be missing, in
        // which case the label is empty, as the device itself reports it.
        out.push(MetricObservation::gauge(
            name,
            vec![
                ("source", source.to_string()),
                ("mac_address", client.mac_address.clone()),
                ("ipv4_address", client.ipv4_address.clone().unwrap_or_default()),
                ("ipv6_address", client.ipv6_address.clone().unwrap_or_default()),
                ("hostname", client.hostname.clone().unwrap_or_default()),
            ],
            speed as f64,
        ));
    }
}

/// Zero-pad channel ids to two digits so dashboards sort them naturally.
fn format_channel_id(id: &str) -> String {
    format!("{id:0>2}")
}

/// Fahrenheit as reported by the device to Celsius.
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Parse the firmware's uptime format, e.g. `36day(s)15h:24m:58s`.
pub fn parse_uptime_seconds(raw: &str) -> Option<u64> {
    let (days, rest) = raw.split_once("day(s)")?;
    let (hours, rest) = rest.split_once("h:")?;
    let (minutes, rest) = rest.split_once("m:")?;
    let seconds = rest.strip_suffix('s')?;

    let days: u64 = days.trim().parse().ok()?;
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;

    Some(((days * 24 + hours) * 60 + minutes) * 60 + seconds)
}
