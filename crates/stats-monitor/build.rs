use std::process::Command;

use time::OffsetDateTime;
use time::macros::format_description;

/// Stamp the binary with the checkout it was built from and the build day.
fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");

    let revision = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "nogit".to_string());

    let built_at = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);
    let build_day = built_at
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GIT_SHA={revision}");
    println!("cargo:rustc-env=BUILD_DATE={build_day}");
}
