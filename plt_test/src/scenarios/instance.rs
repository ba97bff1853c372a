use std::ffi::c_void;

use srx_plt::{PltHookEngine, ProcMaps};

use crate::test_ctx::{
    PUTS_BACKUP, PUTS_HITS, hits, hook_puts, lib_header_region, lib_layout, load_plt_test,
    original, plt_test_trigger,
};

// 独立的 engine 实例，可以观察区间状态
pub unsafe fn scenario_engine_instance() {
    let handle = load_plt_test();
    let inode = lib_header_region().inode;
    let layout = lib_layout();
    let engine = PltHookEngine::with_source(ProcMaps { pid: None });

    assert!(engine.register_hook(
        inode,
        "puts",
        hook_puts as *mut c_void,
        Some(PUTS_BACKUP.clone())
    ));
    assert_eq!(engine.pending_count(), 1);
    assert!(engine.commit_hook(), "instance commit failed");
    assert_eq!(engine.pending_count(), 0);

    let hooked: Vec<_> = engine
        .tracked_regions()
        .into_iter()
        .filter(|region| region.backup != 0)
        .collect();
    assert!(!hooked.is_empty(), "no region was backed up");
    assert!(hooked.iter().all(|region| region.hooks >= 1));
    let real_puts = original(&PUTS_BACKUP);

    let before = hits(&PUTS_HITS);
    plt_test_trigger(handle);
    assert!(hits(&PUTS_HITS) > before, "instance hook not hit");

    assert!(engine.register_hook(inode, "puts", real_puts, None));
    assert!(engine.commit_hook(), "instance unhook failed");
    assert!(engine.tracked_regions().iter().all(|region| region.backup == 0));
    assert_eq!(lib_layout(), layout, "layout not restored");

    drop(engine);
    libc::dlclose(handle);
}
