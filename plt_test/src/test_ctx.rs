use std::ffi::{CString, c_char, c_void};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use srx_plt::{BackupSlot, MapInfo, new_backup_slot, scan};

pub const LIB_NAME: &str = "libplt_test.so";

pub static PUTS_HITS: AtomicUsize = AtomicUsize::new(0);
pub static STRLEN_HITS: AtomicUsize = AtomicUsize::new(0);

pub static PUTS_BACKUP: Lazy<BackupSlot> = Lazy::new(new_backup_slot);
pub static STRLEN_BACKUP: Lazy<BackupSlot> = Lazy::new(new_backup_slot);

pub type PutsFn = unsafe extern "C" fn(*const c_char) -> i32;
pub type StrlenFn = unsafe extern "C" fn(*const c_char) -> usize;

pub unsafe extern "C" fn hook_puts(s: *const c_char) -> i32 {
    PUTS_HITS.fetch_add(1, Ordering::Relaxed);
    let prev = PUTS_BACKUP.load(Ordering::SeqCst);
    if prev.is_null() {
        return 0;
    }
    let prev_fn: PutsFn = std::mem::transmute(prev);
    prev_fn(s)
}

pub unsafe extern "C" fn hook_strlen(s: *const c_char) -> usize {
    STRLEN_HITS.fetch_add(1, Ordering::Relaxed);
    let prev = STRLEN_BACKUP.load(Ordering::SeqCst);
    if prev.is_null() {
        return 0;
    }
    let prev_fn: StrlenFn = std::mem::transmute(prev);
    prev_fn(s)
}

// 与可执行文件放在同一目录下
pub unsafe fn load_plt_test() -> *mut c_void {
    let exe = std::env::current_exe().expect("current_exe failed");
    let path = exe.with_file_name(LIB_NAME);
    let path = CString::new(path.to_string_lossy().into_owned()).expect("cstring failed");
    let handle = libc::dlopen(path.as_ptr(), libc::RTLD_NOW);
    assert!(!handle.is_null(), "dlopen {LIB_NAME} failed");
    handle
}

pub unsafe fn plt_test_trigger(handle: *mut c_void) {
    let sym = libc::dlsym(handle, c"plt_test_trigger".as_ptr());
    assert!(!sym.is_null(), "dlsym plt_test_trigger failed");
    let trigger: unsafe extern "C" fn() = std::mem::transmute(sym);
    trigger();
}

pub unsafe fn plt_test_trigger_with_input(handle: *mut c_void, msg: &CString) {
    let sym = libc::dlsym(handle, c"plt_test_trigger_with_input".as_ptr());
    assert!(!sym.is_null(), "dlsym plt_test_trigger_with_input failed");
    let trigger: unsafe extern "C" fn(*const c_char) = std::mem::transmute(sym);
    trigger(msg.as_ptr());
}

// 库的 ELF 头所在映射
pub fn lib_header_region() -> MapInfo {
    scan()
        .into_iter()
        .find(|info| info.path.ends_with(LIB_NAME) && info.offset == 0)
        .expect("libplt_test.so header mapping not found")
}

pub fn lib_file_size() -> usize {
    fs::metadata(lib_header_region().path)
        .map(|meta| meta.len() as usize)
        .expect("stat libplt_test.so failed")
}

// 库所有文件映射的 (start, end, offset)
pub fn lib_layout() -> Vec<(usize, usize, usize)> {
    let inode = lib_header_region().inode;
    scan()
        .into_iter()
        .filter(|info| info.inode == inode)
        .map(|info| (info.start, info.end, info.offset))
        .collect()
}

// 只读映射的字节快照，可写段的内容会随运行变化
pub fn lib_readonly_bytes() -> Vec<(usize, Vec<u8>)> {
    let inode = lib_header_region().inode;
    scan()
        .into_iter()
        .filter(|info| info.inode == inode && info.is_readable())
        .filter(|info| info.perms & libc::PROT_WRITE == 0)
        .map(|info| {
            let bytes =
                unsafe { std::slice::from_raw_parts(info.start as *const u8, info.len()).to_vec() };
            (info.start, bytes)
        })
        .collect()
}

pub fn hits(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::Relaxed)
}

pub fn original(slot: &BackupSlot) -> *mut c_void {
    let prev = slot.load(Ordering::SeqCst);
    assert!(!prev.is_null(), "backup slot was not filled");
    prev
}
