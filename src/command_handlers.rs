use anyhow::{Context, Result};
use std::time::Duration;

use crate::app::AppContext;
use crate::exports::ExportFormat;
use crate::models::Device;
use crate::network::list_valid_interfaces;
use crate::registry::{DiscoveryOrchestrator, ScanReport, UpdateKind};

/// Extra slack on top of the lookup timeouts before a scan stops waiting
const FINGERPRINT_GRACE: Duration = Duration::from_secs(1);

pub(crate) async fn handle_interfaces(ctx: &AppContext) -> Result<()> {
    let interfaces = list_valid_interfaces();
    if interfaces.is_empty() {
        ctx.emit("No valid IPv4 network interfaces found.");
    } else {
        for interface in interfaces {
            ctx.emit(&interface);
        }
    }
    Ok(())
}

pub(crate) async fn handle_scan(ctx: &AppContext, full: bool, json: bool) -> Result<()> {
    crate::log_stderr!(
        "lanlens v{} - {} scan",
        env!("CARGO_PKG_VERSION"),
        if full { "full" } else { "quick" }
    );

    let engine = ctx.open_engine()?;
    let report = if full {
        engine.full_scan().await
    } else {
        engine.quick_scan().await
    };
    settle_fingerprints(&engine).await;
    log_report(&report);

    if json {
        let out = engine
            .export_devices(ExportFormat::Json)
            .context("Failed to serialize device list")?;
        ctx.emit(&out);
    } else {
        ctx.emit(&report_line(&report));
        emit_device_table(ctx, &engine.devices());
    }
    Ok(())
}

pub(crate) async fn handle_watch(ctx: &AppContext, seconds: u64, interface: Option<String>) -> Result<()> {
    crate::log_stderr!("lanlens v{} - watching for {}s", env!("CARGO_PKG_VERSION"), seconds);

    let engine = ctx.open_engine()?;
    // Seed the ARP cache so mDNS and SSDP announcers resolve to a MAC
    let report = engine.quick_scan().await;
    log_report(&report);

    let output = ctx.output();
    let observer = engine.registry().subscribe(move |updates| {
        for update in updates {
            if update.kind == UpdateKind::Updated {
                continue;
            }
            output(&format!("{:<12} {}", update.kind.as_str(), device_line(&update.device)));
        }
    });

    if let Some(name) = interface.as_deref() {
        crate::log_stderr!("Using requested interface: {}", name);
    }
    let status = engine.start_passive(interface.as_deref()).await;
    if !status.any() {
        engine.registry().unsubscribe(observer);
        return Err(anyhow::anyhow!(
            "No passive listener could be started. Capture and multicast usually need elevated privileges."
        ));
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                crate::log_warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }

    engine.stop_passive();
    settle_fingerprints(&engine).await;
    engine.registry().unsubscribe(observer);
    emit_device_table(ctx, &engine.devices());
    Ok(())
}

pub(crate) async fn handle_devices(ctx: &AppContext) -> Result<()> {
    let engine = ctx.open_engine()?;
    emit_device_table(ctx, &engine.devices());
    Ok(())
}

pub(crate) async fn handle_export(ctx: &AppContext, format: ExportFormat) -> Result<()> {
    let engine = ctx.open_engine()?;
    let out = engine
        .export_devices(format)
        .with_context(|| format!("Failed to export devices as {}", format))?;
    ctx.emit(out.trim_end());
    Ok(())
}

pub(crate) async fn handle_clear_cache(ctx: &AppContext) -> Result<()> {
    let engine = ctx.open_engine()?;
    let before = engine.clear_caches();
    ctx.emit(&format!(
        "Cleared {} ARP and {} fingerprint cache entries",
        before.arp.size, before.fingerprint.size
    ));
    Ok(())
}

async fn settle_fingerprints(engine: &DiscoveryOrchestrator) {
    let settings = engine.settings();
    let budget = settings.description_timeout() + settings.remote_timeout() + FINGERPRINT_GRACE;
    if !engine.wait_for_fingerprints(budget).await {
        crate::log_warn!("Some fingerprint lookups did not finish in {:?}", budget);
    }
    engine.flush_fingerprint_cache();
}

fn log_report(report: &ScanReport) {
    for failure in &report.failures {
        crate::log_warn!("{}: {}", failure.target, failure.reason);
    }
}

fn report_line(report: &ScanReport) -> String {
    format!(
        "{} scan: {} device(s), {} new, {} went offline, {} with open ports in {}ms{}",
        report.mode,
        report.devices_seen,
        report.new_devices,
        report.went_offline,
        report.hosts_with_open_ports,
        report.duration_ms,
        if report.cancelled { " (cancelled)" } else { "" }
    )
}

fn emit_device_table(ctx: &AppContext, devices: &[Device]) {
    if devices.is_empty() {
        ctx.emit("No devices known yet. Run `lanlens scan` first.");
        return;
    }
    ctx.emit(&format!(
        "{:<15} {:<17} {:<14} {:>5} {:>5}  {:<7} NAME",
        "IP", "MAC", "TYPE", "CONF", "SCORE", "STATE"
    ));
    for device in devices {
        ctx.emit(&device_line(device));
    }
}

pub(crate) fn device_line(device: &Device) -> String {
    let name = match device.vendor.as_deref() {
        Some(vendor) if device.display_name() == device.ip => vendor,
        _ => device.display_name(),
    };
    format!(
        "{:<15} {:<17} {:<14} {:>4.0}% {:>5}  {:<7} {}",
        device.ip,
        device.mac.as_str(),
        device.device_type.as_str(),
        device.confidence * 100.0,
        device.smart_score,
        if device.is_online { "online" } else { "offline" },
        name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceType, MacAddress};
    use chrono::Utc;

    #[test]
    fn device_line_prefers_label_then_vendor() {
        let mac = MacAddress::parse("a4:91:b1:00:00:01").unwrap();
        let mut device = Device::new(mac, "192.168.1.20".into(), Utc::now());
        device.vendor = Some("Acme".into());
        device.device_type = DeviceType::Printer;
        device.confidence = 0.5;
        device.smart_score = 42;

        let line = device_line(&device);
        assert!(line.starts_with("192.168.1.20"));
        assert!(line.contains("A4:91:B1:00:00:01"));
        assert!(line.contains("50%"));
        assert!(line.contains("42"));
        assert!(line.ends_with("Acme"));

        device.user_label = Some("Office printer".into());
        device.is_online = false;
        let line = device_line(&device);
        assert!(line.contains("offline"));
        assert!(line.ends_with("Office printer"));
    }
}
