//! Raw status records decoded from the modem's `getter.xml` documents.
//!
//! Decoding is deliberately lenient: a leaf field that is missing or does not
//! parse becomes `None` and is later omitted from the metric output, while a
//! document that is not well-formed XML at all is a [`ClientError::Protocol`].
//! Firmware revisions differ in which fields they report, so nothing here
//! assumes a complete document.

use std::collections::HashMap;
use std::str::FromStr;

use roxmltree::{Document, Node};

use crate::client::ClientError;

/// Everything read from the device during one authenticated query cycle.
///
/// Built fresh on every scrape and discarded after mapping. Sections are
/// `None` when the corresponding metric group is disabled in the config (or,
/// for [`lan_clients`](Self::lan_clients), when the sub-fetch failed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub device_info: Option<DeviceInfo>,
    pub temperature: Option<TemperatureReading>,
    pub downstream: Vec<DownstreamChannel>,
    pub upstream: Vec<UpstreamChannel>,
    pub lan_clients: Option<LanClients>,
}

/// Identity and provisioning state, combined from the `GlobalSettings`,
/// `cm_system_info` and `cmstatus` documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub docsis_mode: Option<String>,
    pub cm_provision_mode: Option<String>,
    pub gw_provision_mode: Option<String>,
    pub operator_id: Option<String>,
    pub cable_modem_status: Option<String>,
    pub provisioning_status: Option<String>,
    /// Raw uptime string, e.g. `36day(s)15h:24m:58s`. Parsed during mapping.
    pub uptime: Option<String>,
}

/// Temperatures as reported by the `cmstate` document, in Fahrenheit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemperatureReading {
    pub tuner_fahrenheit: Option<f64>,
    pub board_fahrenheit: Option<f64>,
}

/// One downstream RF channel, merged from the downstream and signal tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownstreamChannel {
    pub channel_id: String,
    pub frequency_hz: Option<u64>,
    pub power_dbmv: Option<f64>,
    pub snr_db: Option<f64>,
    pub rxmer_db: Option<f64>,
    pub modulation: Option<String>,
    /// Only reported by some firmware revisions.
    pub locked: Option<bool>,
    pub codewords_unerrored: Option<u64>,
    pub codewords_corrected: Option<u64>,
    pub codewords_uncorrectable: Option<u64>,
}

impl DownstreamChannel {
    /// The firmware keeps unused channel slots in the table with a zero
    /// frequency. Such a slot is the absence of a channel, not a zero reading.
    pub fn is_unused(&self) -> bool {
        self.frequency_hz.unwrap_or(0) == 0
    }
}

/// One upstream RF channel from the upstream table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamChannel {
    pub channel_id: String,
    pub frequency_hz: Option<u64>,
    pub power_dbmv: Option<f64>,
    pub symbol_rate_ksps: Option<f64>,
    pub modulation: Option<String>,
    pub t1_timeouts: Option<u64>,
    pub t2_timeouts: Option<u64>,
    pub t3_timeouts: Option<u64>,
    pub t4_timeouts: Option<u64>,
}

impl UpstreamChannel {
    pub fn is_unused(&self) -> bool {
        self.frequency_hz.unwrap_or(0) == 0
    }
}

/// Connected clients from the `LanUserTable` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanClients {
    pub ethernet: Vec<LanClient>,
    pub wifi: Vec<LanClient>,
}

/// A single connected client. Depending on the firmware, either or both of
/// the IPv4/IPv6 addresses may be reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanClient {
    pub mac_address: String,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub hostname: Option<String>,
    pub speed_mbit: Option<u64>,
}

/// Combine `GlobalSettings`, `cm_system_info` and `cmstatus` into one record.
pub fn parse_device_info(
    global_settings: &str,
    system_info: &str,
    cm_status: &str,
) -> Result<DeviceInfo, ClientError> {
    let global = parse_document(global_settings)?;
    let sysinfo = parse_document(system_info)?;
    let status = parse_document(cm_status)?;

    let global = global.root_element();
    let sysinfo = sysinfo.root_element();
    let status = status.root_element();

    Ok(DeviceInfo {
        firmware_version: child_text(global, "SwVersion"),
        hardware_version: child_text(sysinfo, "cm_hardware_version"),
        docsis_mode: child_text(sysinfo, "cm_docsis_mode"),
        cm_provision_mode: child_text(global, "CmProvisionMode"),
        gw_provision_mode: child_text(global, "GwProvisionMode"),
        operator_id: child_text(global, "OperatorId"),
        cable_modem_status: child_text(status, "cm_comment"),
        provisioning_status: child_text(status, "provisioning_st"),
        uptime: child_text(sysinfo, "cm_system_uptime"),
    })
}

/// Decode the `cmstate` document.
///
/// `TunnerTemperature` is the tag name the firmware actually emits.
pub fn parse_temperature(xml: &str) -> Result<TemperatureReading, ClientError> {
    let doc = parse_document(xml)?;
    let root = doc.root_element();

    Ok(TemperatureReading {
        tuner_fahrenheit: child_value(root, "TunnerTemperature"),
        board_fahrenheit: child_value(root, "Temperature"),
    })
}

/// Decode the downstream table and merge in the per-channel codeword counters
/// from the signal table (keyed by channel id).
pub fn parse_downstream(
    downstream_table: &str,
    signal_table: &str,
) -> Result<Vec<DownstreamChannel>, ClientError> {
    let signals = parse_document(signal_table)?;
    let mut codewords: HashMap<String, (Option<u64>, Option<u64>, Option<u64>)> = HashMap::new();
    for signal in children_named(signals.root_element(), "signal") {
        if let Some(id) = child_text(signal, "dsid") {
            codewords.insert(
                id,
                (
                    child_value(signal, "unerrored"),
                    child_value(signal, "correctable"),
                    child_value(signal, "uncorrectable"),
                ),
            );
        }
    }

    let table = parse_document(downstream_table)?;
    let mut channels = Vec::new();
    for node in children_named(table.root_element(), "downstream") {
        let Some(channel_id) = child_text(node, "chid") else {
            continue;
        };
        let (unerrored, corrected, uncorrectable) = codewords
            .get(&channel_id)
            .copied()
            .unwrap_or((None, None, None));

        channels.push(DownstreamChannel {
            channel_id,
            frequency_hz: child_value(node, "freq"),
            power_dbmv: child_value(node, "pow"),
            snr_db: child_value(node, "snr"),
            rxmer_db: child_value(node, "RxMER"),
            modulation: child_text(node, "mod"),
            locked: child_text(node, "lock").map(|s| s.eq_ignore_ascii_case("locked")),
            codewords_unerrored: unerrored,
            codewords_corrected: corrected,
            codewords_uncorrectable: uncorrectable,
        });
    }
    Ok(channels)
}

/// Decode the upstream table.
pub fn parse_upstream(xml: &str) -> Result<Vec<UpstreamChannel>, ClientError> {
    let doc = parse_document(xml)?;
    let mut channels = Vec::new();
    for node in children_named(doc.root_element(), "upstream") {
        let Some(channel_id) = child_text(node, "usid") else {
            continue;
        };
        channels.push(UpstreamChannel {
            channel_id,
            frequency_hz: child_value(node, "freq"),
            power_dbmv: child_value(node, "power"),
            symbol_rate_ksps: child_value(node, "srate"),
            modulation: child_text(node, "mod"),
            t1_timeouts: child_value(node, "t1Timeouts"),
            t2_timeouts: child_value(node, "t2Timeouts"),
            t3_timeouts: child_value(node, "t3Timeouts"),
            t4_timeouts: child_value(node, "t4Timeouts"),
        });
    }
    Ok(channels)
}

/// Decode the `LanUserTable` document. LAN and Wi-Fi clients share a format.
pub fn parse_lan_clients(xml: &str) -> Result<LanClients, ClientError> {
    let doc = parse_document(xml)?;
    let root = doc.root_element();

    let mut clients = LanClients::default();
    for (section, target) in [
        ("Ethernet", &mut clients.ethernet),
        ("WIFI", &mut clients.wifi),
    ] {
        let Some(section) = root.children().find(|n| n.has_tag_name(section)) else {
            continue;
        };
        for info in children_named(section, "clientinfo") {
            let Some(mac_address) = child_text(info, "MACAddr") else {
                continue;
            };
            target.push(LanClient {
                mac_address,
                ipv4_address: child_text(info, "IPv4Addr"),
                ipv6_address: child_text(info, "IPv6Addr"),
                hostname: child_text(info, "hostname"),
                speed_mbit: child_value(info, "speed"),
            });
        }
    }
    Ok(clients)
}

fn parse_document(xml: &str) -> Result<Document<'_>, ClientError> {
    Document::parse(xml).map_err(|e| ClientError::Protocol(format!("invalid XML: {e}")))
}

fn children_named<'a>(node: Node<'a, 'a>, name: &'a str) -> impl Iterator<Item = Node<'a, 'a>> {
    node.children().filter(move |n| n.has_tag_name(name))
}

/// Trimmed text of a direct child element; empty text counts as absent.
fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    let child = node.children().find(|n| n.has_tag_name(name))?;
    let text = child.text()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Parsed text of a direct child element; unparseable values count as absent.
fn child_value<T: FromStr>(node: Node<'_, '_>, name: &str) -> Option<T> {
    child_text(node, name)?.parse().ok()
}
