use std::ffi::{CString, c_void};

use srx_plt::{commit_hook, invalidate_backup, register_hook};

use crate::test_ctx::{
    PUTS_BACKUP, PUTS_HITS, STRLEN_BACKUP, STRLEN_HITS, hits, hook_puts, hook_strlen,
    lib_header_region, lib_layout, lib_readonly_bytes, load_plt_test, original,
    plt_test_trigger, plt_test_trigger_with_input,
};

pub unsafe fn scenario_single_hook_unhook() {
    let handle = load_plt_test();
    let inode = lib_header_region().inode;
    let layout = lib_layout();
    let bytes = lib_readonly_bytes();

    assert!(register_hook(
        inode,
        "puts",
        hook_puts as *mut c_void,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(commit_hook(), "commit puts hook failed");
    let real_puts = original(&PUTS_BACKUP);

    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert!(hits(&PUTS_HITS) > before, "puts hook not hit");
    // GOT 所在映射被匿名副本替换，文件页挪到了别处
    assert_ne!(lib_layout(), layout, "layout unchanged while hooked");

    assert!(register_hook(inode, "puts", real_puts, None));
    assert!(commit_hook(), "commit puts unhook failed");
    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert_eq!(hits(&PUTS_HITS), before, "puts hook still active after unhook");

    assert_eq!(lib_layout(), layout, "layout not restored");
    assert_eq!(lib_readonly_bytes(), bytes, "content not restored");
    libc::dlclose(handle);
}

pub unsafe fn scenario_shared_backup() {
    let handle = load_plt_test();
    let inode = lib_header_region().inode;
    let layout = lib_layout();
    let bytes = lib_readonly_bytes();
    let msg = CString::new("plt-test-shared").expect("cstring failed");

    assert!(register_hook(
        inode,
        "puts",
        hook_puts as *mut c_void,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(register_hook(
        inode,
        "strlen",
        hook_strlen as *mut c_void,
        Some(STRLEN_BACKUP.clone())
    ));
    assert!(commit_hook(), "commit puts+strlen failed");
    let real_puts = original(&PUTS_BACKUP);
    let real_strlen = original(&STRLEN_BACKUP);

    let (puts_before, strlen_before) = (hits(&PUTS_HITS), hits(&STRLEN_HITS));
    plt_test_trigger_with_input(handle, &msg);
    assert!(hits(&PUTS_HITS) > puts_before, "puts hook not hit");
    assert!(hits(&STRLEN_HITS) > strlen_before, "strlen hook not hit");

    // 撤掉一个后备份仍在，另一个继续生效
    assert!(register_hook(inode, "puts", real_puts, None));
    assert!(commit_hook(), "commit puts unhook failed");
    let (puts_before, strlen_before) = (hits(&PUTS_HITS), hits(&STRLEN_HITS));
    plt_test_trigger_with_input(handle, &msg);
    assert_eq!(hits(&PUTS_HITS), puts_before, "puts hook still active");
    assert!(hits(&STRLEN_HITS) > strlen_before, "strlen hook lost");
    assert_ne!(lib_layout(), layout, "backup released too early");

    assert!(register_hook(inode, "strlen", real_strlen, None));
    assert!(commit_hook(), "commit strlen unhook failed");
    let strlen_before = hits(&STRLEN_HITS);
    plt_test_trigger_with_input(handle, &msg);
    assert_eq!(hits(&STRLEN_HITS), strlen_before, "strlen hook still active");

    assert_eq!(lib_layout(), layout, "layout not restored");
    assert_eq!(lib_readonly_bytes(), bytes, "content not restored");
    libc::dlclose(handle);
}

pub unsafe fn scenario_invalidate_backup() {
    let handle = load_plt_test();
    let inode = lib_header_region().inode;
    let layout = lib_layout();

    assert!(register_hook(
        inode,
        "puts",
        hook_puts as *mut c_void,
        Some(PUTS_BACKUP.clone())
    ));
    assert!(commit_hook(), "commit puts hook failed");
    let real_puts = original(&PUTS_BACKUP);

    // 放弃备份后原始映射回到原位，hook 依然生效
    assert!(invalidate_backup(), "invalidate failed");
    assert_eq!(lib_layout(), layout, "layout not restored by invalidate");
    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert!(hits(&PUTS_HITS) > before, "hook lost after invalidate");

    // 此时写回原值相当于一次新的替换，需要再放弃一次备份才会落到原始映射
    assert!(register_hook(inode, "puts", real_puts, None));
    assert!(commit_hook(), "commit puts restore failed");
    assert!(invalidate_backup(), "second invalidate failed");
    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert_eq!(hits(&PUTS_HITS), before, "puts hook still active");
    assert_eq!(lib_layout(), layout, "layout not restored");

    assert!(invalidate_backup(), "invalidate without backups failed");
    libc::dlclose(handle);
}
