#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]

#[cfg(not(any(target_os = "android", target_os = "linux")))]
compile_error!("srx_plt supports Linux and Android only");

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
compile_error!("srx_plt supports only 64-bit architectures: aarch64 and x86_64");

// 进程级公共接口：扫描、注册、提交、放弃备份
mod api;
// 内存中 ELF 映像解析，按符号定位 PLT/GOT slot
mod elf;
// hook 引擎：注册队列、区间注册表、备份与恢复
mod engine;
// 错误码定义
mod errno;
// 日志输出，Android 上走 logcat
mod log;
// /proc/<pid>/maps 解析
mod maps;
// mmap / mremap / mprotect 封装
mod memory;
// 版本信息
mod version;

pub use api::{
    commit_hook, get_debug, get_version, get_version_code, invalidate_backup, register_hook,
    register_hook_in_range, register_hook_on_device, scan, scan_pid, set_debug,
};
pub use engine::{BackupSlot, PltHookEngine, RegionSnapshot, new_backup_slot};
pub use errno::Errno as PltHookErrno;
pub use maps::{MapInfo, MapsSource, ProcMaps, parse_maps, parse_maps_line};
