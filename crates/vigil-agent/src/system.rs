//! Host information probing

use vigil_proto::SystemInfo;

/// Best-effort hostname of this machine
pub fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Collect host facts for the entity
pub fn probe() -> SystemInfo {
    SystemInfo {
        hostname: hostname(),
        os: std::env::consts::OS.to_string(),
        platform: std::env::consts::FAMILY.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}
