// 进程级公共接口，背后是一个全局 PltHookEngine
use crate::engine::{BackupSlot, PltHookEngine};
use crate::log;
use crate::maps::MapInfo;
use crate::version;
use once_cell::sync::Lazy;
use std::ffi::c_void;

// 首次使用时注册 atexit，进程或库卸载时放弃所有备份
static ENGINE: Lazy<PltHookEngine> = Lazy::new(|| {
    if unsafe { libc::atexit(invalidate_at_exit) } != 0 {
        log::warn(format_args!("atexit registration failed"));
    }
    PltHookEngine::new()
});

extern "C" fn invalidate_at_exit() {
    if let Some(engine) = Lazy::get(&ENGINE) {
        engine.invalidate_backup();
    }
}

pub fn get_version() -> String {
    version::version_str_full()
}

// major << 16 | minor << 8 | patch
pub fn get_version_code() -> u32 {
    version::version()
}

pub fn get_debug() -> bool {
    log::debug_enabled()
}

pub fn set_debug(debug: bool) {
    log::set_debug_enabled(debug);
}

// 当前进程中可 hook 的映射
pub fn scan() -> Vec<MapInfo> {
    MapInfo::scan()
}

pub fn scan_pid(pid: i32) -> Vec<MapInfo> {
    MapInfo::scan_pid(pid)
}

// 登记一条 hook，commit_hook 之前不会触碰内存
pub fn register_hook(
    inode: u64,
    symbol: &str,
    callback: *mut c_void,
    backup: Option<BackupSlot>,
) -> bool {
    ENGINE.register_hook(inode, symbol, callback, backup)
}

pub fn register_hook_on_device(
    dev: u64,
    inode: u64,
    symbol: &str,
    callback: *mut c_void,
    backup: Option<BackupSlot>,
) -> bool {
    ENGINE.register_hook_on_device(dev, inode, symbol, callback, backup)
}

pub fn register_hook_in_range(
    dev: u64,
    inode: u64,
    offset: usize,
    size: usize,
    symbol: &str,
    callback: *mut c_void,
    backup: Option<BackupSlot>,
) -> bool {
    ENGINE.register_hook_in_range(dev, inode, offset, size, symbol, callback, backup)
}

pub fn commit_hook() -> bool {
    ENGINE.commit_hook()
}

pub fn invalidate_backup() -> bool {
    ENGINE.invalidate_backup()
}
