use std::ffi::c_void;
use std::sync::atomic::Ordering;

use srx_plt::{
    commit_hook, new_backup_slot, register_hook, register_hook_in_range, register_hook_on_device,
};

use crate::test_ctx::{
    PUTS_BACKUP, PUTS_HITS, hits, hook_puts, lib_file_size, lib_header_region, lib_layout,
    load_plt_test, original, plt_test_trigger,
};

pub unsafe fn scenario_rejected_registration() {
    let header = lib_header_region();
    let hook = hook_puts as *mut c_void;

    assert!(!register_hook(header.inode, "", hook, None));
    assert!(!register_hook(header.inode, "puts", std::ptr::null_mut(), None));
    assert!(!register_hook_on_device(0, header.inode, "puts", hook, None));
    assert!(!register_hook_in_range(header.dev, header.inode, 0, 0, "puts", hook, None));
    // 没有待提交的注册
    assert!(commit_hook(), "empty commit failed");
    assert!(commit_hook(), "repeated empty commit failed");
}

pub unsafe fn scenario_no_match_is_consumed() {
    let handle = load_plt_test();
    let layout = lib_layout();
    let slot = new_backup_slot();

    assert!(register_hook(u64::MAX, "puts", hook_puts as *mut c_void, Some(slot.clone())));
    assert!(commit_hook(), "commit without match failed");
    assert!(slot.load(Ordering::SeqCst).is_null());
    assert_eq!(lib_layout(), layout);

    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert_eq!(hits(&PUTS_HITS), before, "unmatched hook took effect");
    libc::dlclose(handle);
}

pub unsafe fn scenario_missing_symbol() {
    let handle = load_plt_test();
    let inode = lib_header_region().inode;
    let layout = lib_layout();
    let slot = new_backup_slot();

    assert!(register_hook(
        inode,
        "srx_plt_no_such_symbol",
        hook_puts as *mut c_void,
        Some(slot.clone())
    ));
    assert!(commit_hook(), "commit with missing symbol failed");
    assert!(slot.load(Ordering::SeqCst).is_null());
    assert_eq!(lib_layout(), layout, "missing symbol created a backup");
    libc::dlclose(handle);
}

pub unsafe fn scenario_device_and_range() {
    let handle = load_plt_test();
    let header = lib_header_region();
    let layout = lib_layout();
    let hook = hook_puts as *mut c_void;

    // 设备号不符时不命中
    assert!(register_hook_on_device(
        header.dev + 1,
        header.inode,
        "puts",
        hook,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(commit_hook());
    assert_eq!(lib_layout(), layout, "wrong device matched");

    // 范围起点不是 ELF 头时不会解析
    assert!(register_hook_in_range(
        header.dev,
        header.inode,
        0x1000,
        lib_file_size(),
        "puts",
        hook,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(commit_hook());
    assert_eq!(lib_layout(), layout, "range without elf header matched");

    assert!(register_hook_in_range(
        header.dev,
        header.inode,
        0,
        lib_file_size(),
        "puts",
        hook,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(commit_hook(), "commit ranged hook failed");
    let real_puts = original(&PUTS_BACKUP);
    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert!(hits(&PUTS_HITS) > before, "ranged hook not hit");

    assert!(register_hook_on_device(header.dev, header.inode, "puts", real_puts, None));
    assert!(commit_hook(), "commit unhook failed");
    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert_eq!(hits(&PUTS_HITS), before, "ranged hook still active");
    assert_eq!(lib_layout(), layout, "layout not restored");
    libc::dlclose(handle);
}
