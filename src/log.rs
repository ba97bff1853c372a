use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

pub const LOG_DEBUG: i32 = 3;
pub const LOG_INFO: i32 = 4;
pub const LOG_WARN: i32 = 5;
pub const LOG_ERROR: i32 = 6;

#[cfg(not(target_os = "android"))]
const LOG_TAG: &str = "srx_plt";

static LOG_PRIORITY: AtomicI32 = AtomicI32::new(LOG_WARN);

// 设置日志级别，启用时输出 DEBUG 及以上，禁用时仅输出 WARN 及以上
pub fn set_debug_enabled(enabled: bool) {
    let priority = if enabled { LOG_DEBUG } else { LOG_WARN };
    LOG_PRIORITY.store(priority, Ordering::SeqCst);
}

pub fn debug_enabled() -> bool {
    LOG_PRIORITY.load(Ordering::Relaxed) <= LOG_DEBUG
}

fn enabled(priority: i32) -> bool {
    LOG_PRIORITY.load(Ordering::Relaxed) <= priority
}

#[cfg(target_os = "android")]
mod backend {
    const LOG_TAG_ANDROID: &[u8] = b"srx_plt\0";

    #[link(name = "log")]
    unsafe extern "C" {
        fn __android_log_write(prio: i32, tag: *const i8, text: *const i8) -> i32;
    }

    pub(super) fn write(priority: i32, text: String) {
        let mut text = text.into_bytes();
        for byte in &mut text {
            if *byte == 0 {
                *byte = b' ';
            }
        }
        text.push(0);

        unsafe {
            __android_log_write(
                priority,
                LOG_TAG_ANDROID.as_ptr() as *const i8,
                text.as_ptr() as *const i8,
            );
        }
    }
}

// 非 Android 平台写 stderr，一行一条
#[cfg(not(target_os = "android"))]
mod backend {
    use std::io::Write;

    pub(super) fn write(priority: i32, text: String) {
        let level = match priority {
            super::LOG_DEBUG => "D",
            super::LOG_INFO => "I",
            super::LOG_WARN => "W",
            _ => "E",
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{} {}: {}", level, super::LOG_TAG, text);
    }
}

fn write_log(priority: i32, args: fmt::Arguments) {
    if !enabled(priority) {
        return;
    }
    backend::write(priority, format!("{args}"));
}

pub(crate) fn info(args: fmt::Arguments) {
    write_log(LOG_INFO, args);
}

pub(crate) fn debug(args: fmt::Arguments) {
    write_log(LOG_DEBUG, args);
}

pub(crate) fn warn(args: fmt::Arguments) {
    write_log(LOG_WARN, args);
}

pub(crate) fn error(args: fmt::Arguments) {
    write_log(LOG_ERROR, args);
}
