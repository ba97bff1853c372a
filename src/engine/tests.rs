use super::registry::{HookRegion, RegionRegistry, is_engine_module};
use super::state::{HookTarget, MutexPoisonRecover, PendingHook};
use super::{PltHookEngine, new_backup_slot};
use crate::elf::Elf;
use crate::errno::Errno;
use crate::maps::{MapInfo, parse_maps_line};
use crate::memory;
use std::ffi::c_void;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::atomic::Ordering;

const FAKE_INODE: u64 = 4242;

fn fake_dev() -> u64 {
    libc::makedev(253, 1) as u64
}

fn fake_info(start: usize, end: usize, offset: usize, inode: u64) -> MapInfo {
    MapInfo {
        start,
        end,
        perms: libc::PROT_READ,
        is_private: true,
        offset,
        dev: fake_dev(),
        inode,
        path: "/data/app/libfake.so".to_string(),
    }
}

fn pending(target: HookTarget, symbol: &str) -> PendingHook {
    PendingHook {
        target,
        symbol: symbol.to_string(),
        callback: 0x1234,
        backup: None,
    }
}

// 一段只读的真实匿名映射，内容为递增的指针大小数值
struct TestRegion {
    start: usize,
    len: usize,
}

impl TestRegion {
    fn new(pages: usize) -> Self {
        let len = memory::page_size() * pages;
        let start = memory::reserve(len).expect("reserve");
        memory::map_anonymous_fixed(start, len, libc::PROT_READ | libc::PROT_WRITE).expect("map");
        for idx in 0..len / 8 {
            unsafe { memory::write_slot(start + idx * 8, 0x5a5a_0000 + idx) };
        }
        memory::protect(start, len, libc::PROT_READ).expect("protect");
        Self { start, len }
    }

    fn info(&self) -> MapInfo {
        fake_info(self.start, self.start + self.len, 0, FAKE_INODE)
    }

    fn bytes(&self) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.start as *const u8, self.len).to_vec() }
    }

    fn slot(&self, idx: usize) -> usize {
        self.start + idx * 8
    }
}

impl Drop for TestRegion {
    fn drop(&mut self) {
        memory::release(self.start, self.len);
    }
}

// 测试二进制（也就是引擎所在模块）的 ELF 头映射
fn exe_header_region() -> MapInfo {
    let inode = fs::metadata(std::env::current_exe().expect("current_exe"))
        .expect("stat current exe")
        .ino();
    fs::read_to_string("/proc/self/maps")
        .expect("read maps")
        .lines()
        .filter_map(parse_maps_line)
        .find(|info| info.inode == inode && info.offset == 0 && info.is_readable())
        .expect("header mapping of test binary")
}

extern "C" fn fake_getppid() -> libc::pid_t {
    4242
}

fn backup_of(registry: &RegionRegistry, start: usize) -> usize {
    registry.regions[&start].backup
}

#[test]
fn register_rejects_invalid_arguments() {
    let engine = PltHookEngine::with_source(Vec::<MapInfo>::new);
    let callback = 0x1000 as *mut c_void;

    assert!(!engine.register_hook(FAKE_INODE, "", callback, None));
    assert!(!engine.register_hook(FAKE_INODE, "puts", std::ptr::null_mut(), None));
    assert!(!engine.register_hook_on_device(0, FAKE_INODE, "puts", callback, None));
    assert!(!engine.register_hook_on_device(fake_dev(), 0, "puts", callback, None));
    assert!(!engine.register_hook_in_range(
        fake_dev(),
        FAKE_INODE,
        0x1000,
        0,
        "puts",
        callback,
        None
    ));
    assert!(!engine.register_hook_in_range(
        fake_dev(),
        FAKE_INODE,
        usize::MAX,
        2,
        "puts",
        callback,
        None
    ));
    assert_eq!(engine.pending_count(), 0);

    assert!(engine.register_hook(FAKE_INODE, "puts", callback, None));
    assert!(engine.register_hook_in_range(
        fake_dev(),
        FAKE_INODE,
        0x1000,
        0x4000,
        "puts",
        callback,
        None
    ));
    assert_eq!(engine.pending_count(), 2);
}

#[test]
fn commit_without_pending_is_idempotent() {
    let engine = PltHookEngine::with_source(|| vec![fake_info(0x1000, 0x2000, 0, FAKE_INODE)]);
    assert!(engine.commit_hook());
    assert!(engine.commit_hook());
    assert!(engine.tracked_regions().is_empty());
}

#[test]
fn commit_with_empty_scan_fails_and_drops_pending() {
    let engine = PltHookEngine::with_source(Vec::<MapInfo>::new);
    let slot = new_backup_slot();
    let callback = 0x1000 as *mut c_void;
    assert!(engine.register_hook(FAKE_INODE, "puts", callback, Some(slot.clone())));

    assert!(!engine.commit_hook());
    assert_eq!(engine.pending_count(), 0);
    assert!(slot.load(Ordering::SeqCst).is_null());
    assert!(engine.tracked_regions().is_empty());
}

#[test]
fn unmatched_registrations_are_consumed_silently() {
    let engine = PltHookEngine::with_source(|| vec![fake_info(0x1000, 0x2000, 0, FAKE_INODE)]);
    let slot = new_backup_slot();
    let callback = 0x1000 as *mut c_void;
    assert!(engine.register_hook(FAKE_INODE + 1, "puts", callback, Some(slot.clone())));

    assert!(engine.commit_hook());
    assert_eq!(engine.pending_count(), 0);
    assert!(engine.tracked_regions().is_empty());
    assert!(slot.load(Ordering::SeqCst).is_null());
}

#[test]
fn region_without_elf_header_is_tracked_but_untouched() {
    let region = TestRegion::new(1);
    let info = region.info();
    let before = region.bytes();
    let engine = PltHookEngine::with_source(move || vec![info.clone()]);
    assert!(engine.register_hook(FAKE_INODE, "puts", 0x1000 as *mut c_void, None));

    assert!(engine.commit_hook());
    let tracked = engine.tracked_regions();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].start, region.start);
    assert_eq!(tracked[0].backup, 0);
    assert_eq!(tracked[0].hooks, 0);
    assert_eq!(region.bytes(), before);
}

#[test]
fn filter_keeps_regions_hit_by_any_target() {
    let maps = vec![
        fake_info(0x1000, 0x2000, 0, FAKE_INODE),
        fake_info(0x2000, 0x3000, 0x1000, FAKE_INODE),
        fake_info(0x8000, 0x9000, 0, FAKE_INODE + 1),
        fake_info(0xa000, 0xb000, 0x20000, FAKE_INODE + 2),
    ];
    let targets = [
        pending(HookTarget::by_inode(FAKE_INODE), "puts"),
        pending(
            HookTarget {
                dev: Some(fake_dev() + 1),
                ..HookTarget::by_inode(FAKE_INODE + 1)
            },
            "puts",
        ),
        pending(
            HookTarget {
                dev: Some(fake_dev()),
                inode: FAKE_INODE + 2,
                offset_range: 0x10000..0x20000,
            },
            "puts",
        ),
    ];

    let registry = RegionRegistry::from_maps(maps).filter(&targets);
    let starts: Vec<usize> = registry.regions.keys().copied().collect();
    assert_eq!(starts, vec![0x1000, 0x2000]);
}

#[test]
fn elf_region_is_the_one_at_range_start() {
    let target = HookTarget {
        dev: Some(fake_dev()),
        inode: FAKE_INODE,
        offset_range: 0x4000..0x9000,
    };
    assert!(target.is_elf_region(&fake_info(0x1000, 0x2000, 0x4000, FAKE_INODE)));
    assert!(!target.is_elf_region(&fake_info(0x2000, 0x3000, 0x5000, FAKE_INODE)));
    assert!(target.matches(&fake_info(0x2000, 0x3000, 0x5000, FAKE_INODE)));
    assert!(!target.matches(&fake_info(0x3000, 0x4000, 0x9000, FAKE_INODE)));
}

#[test]
fn merge_carries_backed_up_regions_forward() {
    let mut old = RegionRegistry::default();
    let mut hooked = HookRegion::new(fake_info(0x1000, 0x2000, 0, FAKE_INODE));
    hooked.backup = 0x9000;
    hooked.hooks.insert(0x1010, 7);
    old.regions.insert(0x1000, hooked);
    old.regions.insert(0x3000, HookRegion::new(fake_info(0x3000, 0x4000, 0, FAKE_INODE)));

    // 新扫描中原区间已变成匿名映射，备份地址却像文件映射
    let mut fresh = RegionRegistry::from_maps(vec![fake_info(0x9000, 0xa000, 0, FAKE_INODE)]);
    fresh.merge(old);

    let starts: Vec<usize> = fresh.regions.keys().copied().collect();
    assert_eq!(starts, vec![0x1000]);
    assert_eq!(fresh.regions[&0x1000].backup, 0x9000);
    assert_eq!(fresh.regions[&0x1000].hooks.get(&0x1010), Some(&7));
}

#[test]
fn merge_replaces_rescanned_region_with_previous_state() {
    let mut old = RegionRegistry::default();
    let mut region = HookRegion::new(fake_info(0x1000, 0x2000, 0, FAKE_INODE));
    region.hooks.insert(0x1008, 3);
    old.regions.insert(0x1000, region);

    let mut fresh = RegionRegistry::from_maps(vec![
        fake_info(0x1000, 0x2000, 0, FAKE_INODE),
        fake_info(0x5000, 0x6000, 0, FAKE_INODE),
    ]);
    fresh.merge(old);

    assert_eq!(fresh.len(), 2);
    assert_eq!(fresh.regions[&0x1000].hooks.len(), 1);
    assert!(fresh.regions[&0x5000].hooks.is_empty());
}

#[test]
fn hook_slot_outside_regions_fails() {
    let mut registry = RegionRegistry::from_maps(vec![fake_info(0x10000, 0x11000, 0, FAKE_INODE)]);
    assert_eq!(registry.hook_slot(0x8000, 1, None), Err(Errno::NoRegion));
    assert_eq!(registry.hook_slot(0x11000, 1, None), Err(Errno::NoRegion));
    assert_eq!(registry.hook_slot(0x10ffc, 1, None), Err(Errno::NoRegion));
    assert_eq!(backup_of(&registry, 0x10000), 0);
}

#[test]
fn hook_then_unhook_restores_original_pages() {
    let region = TestRegion::new(2);
    let before = region.bytes();
    let mut registry = RegionRegistry::from_maps(vec![region.info()]);
    let slot = new_backup_slot();
    let addr = region.slot(3);
    let original = unsafe { memory::read_slot(addr) };

    registry.hook_slot(addr, 0xfeed, Some(&slot)).expect("hook");
    let backup = backup_of(&registry, region.start);
    assert_ne!(backup, 0);
    assert_eq!(unsafe { memory::read_slot(addr) }, 0xfeed);
    assert_eq!(slot.load(Ordering::SeqCst) as usize, original);
    // 备份中保留着原始内容
    assert_eq!(unsafe { memory::read_slot(backup + 3 * 8) }, original);

    registry.hook_slot(addr, original, None).expect("unhook");
    assert_eq!(backup_of(&registry, region.start), 0);
    assert!(registry.regions[&region.start].hooks.is_empty());
    assert_eq!(region.bytes(), before);
}

#[test]
fn slots_in_one_region_share_a_backup() {
    let region = TestRegion::new(1);
    let before = region.bytes();
    let mut registry = RegionRegistry::from_maps(vec![region.info()]);
    let (a, b) = (region.slot(1), region.slot(9));
    let (orig_a, orig_b) = unsafe { (memory::read_slot(a), memory::read_slot(b)) };

    registry.hook_slot(a, 0xaaaa, None).expect("hook a");
    let backup = backup_of(&registry, region.start);
    registry.hook_slot(b, 0xbbbb, None).expect("hook b");
    assert_eq!(backup_of(&registry, region.start), backup);
    assert_eq!(registry.regions[&region.start].hooks.len(), 2);

    registry.hook_slot(a, orig_a, None).expect("unhook a");
    assert_eq!(backup_of(&registry, region.start), backup);
    assert_eq!(unsafe { memory::read_slot(b) }, 0xbbbb);

    registry.hook_slot(b, orig_b, None).expect("unhook b");
    assert_eq!(backup_of(&registry, region.start), 0);
    assert_eq!(region.bytes(), before);
}

#[test]
fn rehook_keeps_first_recorded_original() {
    let region = TestRegion::new(1);
    let before = region.bytes();
    let mut registry = RegionRegistry::from_maps(vec![region.info()]);
    let addr = region.slot(5);
    let original = unsafe { memory::read_slot(addr) };
    let slot = new_backup_slot();

    registry.hook_slot(addr, 0x1111, None).expect("first hook");
    registry.hook_slot(addr, 0x2222, Some(&slot)).expect("second hook");
    assert_eq!(slot.load(Ordering::SeqCst) as usize, 0x1111);
    assert_eq!(registry.regions[&region.start].hooks.get(&addr), Some(&original));

    // 写入相同值不会改动 backup 输出
    let untouched = new_backup_slot();
    registry.hook_slot(addr, 0x2222, Some(&untouched)).expect("same value");
    assert!(untouched.load(Ordering::SeqCst).is_null());

    registry.hook_slot(addr, original, None).expect("unhook");
    assert_eq!(region.bytes(), before);
}

#[test]
fn invalidate_keeps_live_values_in_original_mapping() {
    let region = TestRegion::new(1);
    let mut registry = RegionRegistry::from_maps(vec![region.info()]);
    let addr = region.slot(2);
    let neighbour = unsafe { memory::read_slot(region.slot(3)) };

    registry.hook_slot(addr, 0xcafe, None).expect("hook");
    assert_ne!(backup_of(&registry, region.start), 0);

    assert!(registry.invalidate_backup());
    let hooked = &registry.regions[&region.start];
    assert_eq!(hooked.backup, 0);
    assert!(hooked.hooks.is_empty());
    assert_eq!(unsafe { memory::read_slot(addr) }, 0xcafe);
    assert_eq!(unsafe { memory::read_slot(region.slot(3)) }, neighbour);

    // 已无备份，再次调用是无操作
    assert!(registry.invalidate_backup());
}

#[test]
fn invalidate_without_hooks_is_noop() {
    let engine = PltHookEngine::with_source(Vec::<MapInfo>::new);
    assert!(engine.invalidate_backup());

    let mut registry = RegionRegistry::from_maps(vec![fake_info(0x1000, 0x2000, 0, FAKE_INODE)]);
    assert!(registry.invalidate_backup());
}

#[test]
fn dropping_engine_invalidates_backups() {
    let region = TestRegion::new(1);
    let addr = region.slot(4);
    let engine = PltHookEngine::with_source(Vec::<MapInfo>::new);
    {
        let mut state = engine.state.lock_or_poison();
        state.registry = RegionRegistry::from_maps(vec![region.info()]);
        state.registry.hook_slot(addr, 0xbeef, None).expect("hook");
    }
    assert_eq!(engine.tracked_regions()[0].hooks, 1);

    drop(engine);
    assert_eq!(unsafe { memory::read_slot(addr) }, 0xbeef);
}

#[test]
fn engine_module_region_is_patched_in_place() {
    let region = TestRegion::new(1);
    let before = region.bytes();
    let mut registry = RegionRegistry::default();
    let mut hooked = HookRegion::new(region.info());
    hooked.is_self = true;
    registry.regions.insert(region.start, hooked);
    let addr = region.slot(6);
    let original = unsafe { memory::read_slot(addr) };

    registry.hook_slot(addr, 0xd00d, None).expect("hook");
    let hooked = &registry.regions[&region.start];
    assert_eq!(hooked.backup, 0);
    assert_eq!(hooked.hooks.len(), 1);
    assert_ne!(hooked.info.perms & libc::PROT_WRITE, 0);
    assert_eq!(unsafe { memory::read_slot(addr) }, 0xd00d);

    registry.hook_slot(addr, original, None).expect("unhook");
    let hooked = &registry.regions[&region.start];
    assert_eq!(hooked.backup, 0);
    assert!(hooked.hooks.is_empty());
    assert_eq!(region.bytes(), before);

    // 没有备份可放弃
    assert!(registry.invalidate_backup());
}

#[test]
fn hooking_own_module_keeps_got_mapped() {
    let real = unsafe { libc::getppid() };
    let header = exe_header_region();
    assert!(is_engine_module(&header));

    let engine = PltHookEngine::new();
    let slot = new_backup_slot();
    let callback = fake_getppid as *mut c_void;
    assert!(engine.register_hook(header.inode, "getppid", callback, Some(slot.clone())));
    assert!(engine.commit_hook());
    assert_eq!(unsafe { libc::getppid() }, 4242);

    let tracked = engine.tracked_regions();
    assert!(tracked.iter().all(|region| region.backup == 0));
    assert!(tracked.iter().any(|region| region.is_self && region.hooks > 0));

    let original = slot.load(Ordering::SeqCst);
    assert!(!original.is_null());
    assert!(engine.register_hook(header.inode, "getppid", original, None));
    assert!(engine.commit_hook());
    assert_eq!(unsafe { libc::getppid() }, real);
}

#[test]
fn failed_slot_does_not_stop_the_batch() {
    let region = TestRegion::new(1);
    let mut registry = RegionRegistry::from_maps(vec![region.info()]);
    let slots = [region.slot(1), region.start + region.len, region.slot(2)];

    assert!(!registry.hook_slots("puts", &slots, 0x7777, None));
    assert_eq!(unsafe { memory::read_slot(region.slot(1)) }, 0x7777);
    assert_eq!(unsafe { memory::read_slot(region.slot(2)) }, 0x7777);
    assert_eq!(registry.regions[&region.start].hooks.len(), 2);

    assert!(registry.invalidate_backup());
}

#[test]
fn commit_reports_unresolved_slots_and_consumes_registrations() {
    let _ = unsafe { libc::getppid() };
    let header = exe_header_region();
    let elf = unsafe { Elf::new(header.start) };
    let slots = elf.find_plt_addr("getppid");
    assert!(!slots.is_empty());
    assert!(slots.iter().all(|&addr| addr >= header.end));

    // 只暴露 ELF 头映射，GOT 所在映射不在跟踪范围内
    let source_header = header.clone();
    let engine = PltHookEngine::with_source(move || vec![source_header.clone()]);
    let callback = fake_getppid as *mut c_void;
    let slot = new_backup_slot();
    assert!(engine.register_hook(header.inode, "getppid", callback, Some(slot.clone())));
    assert!(engine.register_hook(FAKE_INODE, "puts", callback, None));

    assert!(!engine.commit_hook());
    assert_eq!(engine.pending_count(), 0);
    assert!(slot.load(Ordering::SeqCst).is_null());
    let tracked = engine.tracked_regions();
    assert_eq!(tracked.len(), 1);
    assert_eq!((tracked[0].start, tracked[0].backup, tracked[0].hooks), (header.start, 0, 0));
}

#[test]
fn invalidate_failure_clears_region_and_continues() {
    let broken = TestRegion::new(1);
    let healthy = TestRegion::new(1);
    let mut registry = RegionRegistry::from_maps(vec![healthy.info()]);
    registry.hook_slot(healthy.slot(3), 0xabcd, None).expect("hook healthy");

    // 备份地址未按页对齐，搬回必然失败
    let mut region = HookRegion::new(broken.info());
    region.backup = broken.start + 1;
    region.hooks.insert(broken.slot(1), 0);
    registry.regions.insert(broken.start, region);

    assert!(!registry.invalidate_backup());
    let failed = &registry.regions[&broken.start];
    assert!(failed.hooks.is_empty());
    assert_eq!(failed.backup, broken.start + 1);

    let restored = &registry.regions[&healthy.start];
    assert_eq!(restored.backup, 0);
    assert!(restored.hooks.is_empty());
    assert_eq!(unsafe { memory::read_slot(healthy.slot(3)) }, 0xabcd);
}
