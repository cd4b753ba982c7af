//! Output formatting utilities for the CLI
//!
//! Tables for device lists and lockdown values, JSON conversion for
//! `--json`, and the colored status-line helpers.

use il_protocol::{DeviceAttachment, Value};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use crate::commands::PairRecordSummary;

/// Format attached devices as an ASCII table
pub fn format_devices(devices: &[DeviceAttachment]) -> String {
    if devices.is_empty() {
        return "No devices attached".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "UDID")]
        udid: String,
        #[tabled(rename = "ID")]
        device_id: u32,
        #[tabled(rename = "CONNECTION")]
        connection: String,
        #[tabled(rename = "PRODUCT")]
        product: String,
        #[tabled(rename = "SERIAL")]
        serial: String,
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            udid: d
                .stable_id()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "-".to_string()),
            device_id: d.device_id,
            connection: or_dash(&d.connection_type),
            product: if d.product_id == 0 {
                "-".to_string()
            } else {
                format!("{:#06x}", d.product_id)
            },
            serial: or_dash(&d.serial_number),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a lockdown value; dictionaries become a key/value table
pub fn format_value(value: &Value) -> String {
    let Some(dict) = value.as_dictionary() else {
        return match value {
            Value::Null => "(not set)".to_string(),
            other => other.to_string(),
        };
    };
    if dict.is_empty() {
        return "(empty)".to_string();
    }

    #[derive(Tabled)]
    struct ValueRow {
        #[tabled(rename = "KEY")]
        key: String,
        #[tabled(rename = "VALUE")]
        value: String,
    }

    let rows: Vec<ValueRow> = dict
        .iter()
        .map(|(key, value)| ValueRow {
            key: key.clone(),
            value: truncate(&value.to_string(), 80),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format a pairing record summary as aligned lines
pub fn format_pair_record(summary: &PairRecordSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("Device:              {}\n", summary.udid));
    output.push_str(&format!("Host ID:             {}\n", or_dash(&summary.host_id)));
    output.push_str(&format!("System BUID:         {}\n", or_dash(&summary.system_buid)));
    output.push_str(&format!("WiFi MAC:            {}\n", or_dash(&summary.wifi_mac_address)));
    output.push_str(&format!("Escrow bag:          {} bytes\n", summary.escrow_bag_len));
    output.push_str(&format!(
        "Host cert SHA-256:   {}\n",
        summary.host_certificate_sha256.as_deref().unwrap_or("-")
    ));
    output.push_str(&format!(
        "Device cert SHA-256: {}\n",
        summary.device_certificate_sha256.as_deref().unwrap_or("-")
    ));
    output
}

/// Convert a property-list value to JSON
///
/// Binary data becomes a lowercase hex string; non-finite reals become null.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::Number::from_f64(*r)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Dictionary(dict) => serde_json::Value::Object(
            dict.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

/// Print any serializable value as pretty JSON on stdout
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Goes to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
