//! Global panic hook.
//!
//! Logs the panic via `tracing`, dispatches a post-mortem notification,
//! and terminates the process with exit code 2. Installed only by the
//! binary so tests keep the default unwinding behavior.

use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;

use crate::notification;

pub fn install() {
    std::panic::set_hook(Box::new(|panic_info: &PanicHookInfo<'_>| {
        let record = format_panic_record(panic_info);
        tracing::error!(target: "withny_dl::panic", "{record}");
        eprintln!("{record}");

        notification::notify_panicked_blocking(&record);
        std::process::exit(2);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_payload_to_string(panic_info);
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = std::thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());
    let backtrace = Backtrace::force_capture();

    format!(
        "PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}"
    )
}

fn panic_payload_to_string(panic_info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = panic_info.payload().downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        return s.clone();
    }
    panic_info.to_string()
}
