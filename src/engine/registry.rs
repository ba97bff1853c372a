// 已跟踪映射区间的有序集合，负责备份、slot 替换与恢复
use crate::elf::Elf;
use crate::errno::Errno;
use crate::log;
use crate::maps::{self, MapInfo};
use crate::memory;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::state::PendingHook;

// 引擎代码所在模块的 (dev, inode)，这个模块的 GOT 不能被挪走
static ENGINE_MODULE: Lazy<Option<(u64, u64)>> = Lazy::new(|| {
    let addr = engine_module_marker as fn() as usize;
    let info = maps::find_mapping(addr).filter(|info| info.inode != 0)?;
    log::debug(format_args!("engine module {} inode={}", info.path, info.inode));
    Some((info.dev, info.inode))
});

#[inline(never)]
fn engine_module_marker() {}

pub(crate) fn is_engine_module(info: &MapInfo) -> bool {
    *ENGINE_MODULE == Some((info.dev, info.inode))
}

// 一段被跟踪的映射
pub(crate) struct HookRegion {
    pub(crate) info: MapInfo,
    // slot 地址 -> 首次 hook 前的原值
    pub(crate) hooks: BTreeMap<usize, usize>,
    // 原始页面被挪到的地址，0 表示尚未备份
    pub(crate) backup: usize,
    // 惰性构建，仅对 ELF 头所在映射有意义
    pub(crate) elf: Option<Elf>,
    // 引擎自身所在模块：原地改写，不做备份
    pub(crate) is_self: bool,
}

impl HookRegion {
    pub(crate) fn new(info: MapInfo) -> Self {
        Self {
            info,
            hooks: BTreeMap::new(),
            backup: 0,
            elf: None,
            is_self: false,
        }
    }

    fn elf_view(&mut self) -> Option<&Elf> {
        if self.elf.is_none() {
            if !self.info.is_readable() {
                return None;
            }
            self.elf = Some(unsafe { Elf::new(self.info.start) });
        }
        self.elf.as_ref().filter(|elf| elf.valid())
    }

    // 把原始页面挪走，在原地址重建可写匿名映射并拷回内容
    fn create_backup(&mut self) -> Result<(), Errno> {
        let start = self.info.start;
        let len = self.info.len();
        if !self.info.is_readable() {
            log::error(format_args!("region {:#x} is not readable", start));
            return Err(Errno::InvalidArg);
        }

        let backup = memory::reserve(len)?;
        if let Err(err) = memory::move_pages(start, len, backup) {
            memory::release(backup, len);
            return Err(err);
        }
        let prot = libc::PROT_READ | libc::PROT_WRITE | self.info.perms;
        if let Err(err) = memory::map_anonymous_fixed(start, len, prot) {
            // 尽力把原始页面放回去
            if memory::move_pages(backup, len, start).is_err() {
                log::error(format_args!("region {:#x} lost its pages", start));
                return Err(Errno::RestoreLost);
            }
            return Err(err);
        }
        unsafe { memory::copy_pages(backup, start, len) };

        log::debug(format_args!(
            "backup {:#x}-{:#x} -> {:#x}",
            start, self.info.end, backup
        ));
        self.backup = backup;
        Ok(())
    }

    // 挪走这段页面会让引擎自己的 GOT 失效，只能补上写权限原地修改
    fn make_writable(&mut self) -> Result<(), Errno> {
        if self.info.perms & libc::PROT_WRITE != 0 {
            return Ok(());
        }
        let prot = self.info.perms | libc::PROT_WRITE;
        memory::protect(self.info.start, self.info.len(), prot)?;
        log::debug(format_args!(
            "writable in place {:#x}-{:#x}",
            self.info.start, self.info.end
        ));
        self.info.perms = prot;
        Ok(())
    }

    // 失败时保留 backup，便于之后重试
    fn restore_backup(&mut self) -> Result<(), Errno> {
        memory::move_pages(self.backup, self.info.len(), self.info.start)?;
        log::debug(format_args!(
            "restore {:#x}-{:#x} from {:#x}",
            self.info.start, self.info.end, self.backup
        ));
        self.backup = 0;
        Ok(())
    }

    fn swap_slot(
        &mut self,
        addr: usize,
        callback: usize,
        backup_out: Option<&AtomicPtr<c_void>>,
    ) -> Result<(), Errno> {
        if self.is_self {
            self.make_writable()?;
        } else if self.backup == 0 {
            self.create_backup()?;
        }

        let current = unsafe { memory::read_slot(addr) };
        if current != callback {
            unsafe { memory::write_slot(addr, callback) };
            if let Some(out) = backup_out {
                out.store(current as *mut c_void, Ordering::SeqCst);
            }
        }

        // 写回首次记录的原值即视为 unhook
        match self.hooks.get(&addr) {
            Some(&original) if original == callback => {
                self.hooks.remove(&addr);
            }
            Some(_) => {}
            None => {
                self.hooks.insert(addr, current);
            }
        }

        if self.hooks.is_empty() && !self.is_self {
            self.restore_backup()?;
        }
        Ok(())
    }

    fn invalidate(&mut self) -> bool {
        if self.backup == 0 {
            return true;
        }
        let start = self.info.start;
        let len = self.info.len();

        // 先记下当前生效的值，换回原始页面后再写回去
        for (&addr, value) in self.hooks.iter_mut() {
            *value = unsafe { memory::read_slot(addr) };
        }
        if memory::move_pages(self.backup, len, start).is_err() {
            self.hooks.clear();
            return false;
        }

        let res = if memory::protect(start, len, libc::PROT_READ | libc::PROT_WRITE).is_ok() {
            for (&addr, &value) in &self.hooks {
                unsafe { memory::write_slot(addr, value) };
            }
            memory::protect(start, len, self.info.perms).is_ok()
        } else {
            false
        };

        log::debug(format_args!(
            "invalidate {:#x}-{:#x} ({} slots)",
            start,
            self.info.end,
            self.hooks.len()
        ));
        self.hooks.clear();
        self.backup = 0;
        res
    }
}

// 某个区间的对外快照
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegionSnapshot {
    pub start: usize,
    pub end: usize,
    pub backup: usize,
    pub inode: u64,
    pub hooks: usize,
    pub is_self: bool,
}

// 以起始地址为键的区间集合，区间互不重叠
#[derive(Default)]
pub(crate) struct RegionRegistry {
    pub(crate) regions: BTreeMap<usize, HookRegion>,
}

impl RegionRegistry {
    pub(crate) fn from_maps(maps: Vec<MapInfo>) -> Self {
        let regions = maps
            .into_iter()
            .map(|info| {
                let is_self = is_engine_module(&info);
                let mut region = HookRegion::new(info);
                region.is_self = is_self;
                (region.info.start, region)
            })
            .collect();
        Self { regions }
    }

    pub(crate) fn len(&self) -> usize {
        self.regions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<RegionSnapshot> {
        self.regions
            .values()
            .map(|region| RegionSnapshot {
                start: region.info.start,
                end: region.info.end,
                backup: region.backup,
                inode: region.info.inode,
                hooks: region.hooks.len(),
                is_self: region.is_self,
            })
            .collect()
    }

    // 只留下至少被一条待提交注册命中的区间
    pub(crate) fn filter(self, pending: &[PendingHook]) -> Self {
        let regions = self
            .regions
            .into_iter()
            .filter(|(_, region)| {
                let hit = pending.iter().any(|reg| reg.target.matches(&region.info));
                if hit {
                    log::debug(format_args!("match {}", region.info));
                }
                hit
            })
            .collect();
        Self { regions }
    }

    // 把上一代的状态并入本次扫描结果
    pub(crate) fn merge(&mut self, old: RegionRegistry) {
        for (start, region) in old.regions {
            // 备份地址在新扫描中表现为普通文件映射，需剔除
            if region.backup != 0 {
                self.regions.remove(&region.backup);
            }
            if let Some(slot) = self.regions.get_mut(&start) {
                *slot = region;
            } else if region.backup != 0 {
                self.regions.insert(start, region);
            }
        }
    }

    pub(crate) fn hook_slot(
        &mut self,
        addr: usize,
        callback: usize,
        backup_out: Option<&AtomicPtr<c_void>>,
    ) -> Result<(), Errno> {
        let Some((_, region)) = self.regions.range_mut(..=addr).next_back() else {
            return Err(Errno::NoRegion);
        };
        let slot_end = addr.checked_add(mem::size_of::<usize>()).ok_or(Errno::NoRegion)?;
        if slot_end > region.info.end {
            return Err(Errno::NoRegion);
        }
        region.swap_slot(addr, callback, backup_out)
    }

    // 按地址顺序消费命中的注册，返回所有 slot 替换是否全部成功
    pub(crate) fn apply(&mut self, pending: &mut Vec<PendingHook>) -> bool {
        let mut res = true;
        let starts: Vec<usize> = self.regions.keys().copied().collect();
        for start in starts {
            let Some(region) = self.regions.get(&start) else {
                continue;
            };
            let (matched, rest): (Vec<_>, Vec<_>) = mem::take(pending)
                .into_iter()
                .partition(|reg| reg.target.is_elf_region(&region.info));
            *pending = rest;

            for reg in matched {
                let slots = match self.regions.get_mut(&start).and_then(HookRegion::elf_view) {
                    Some(elf) => elf.find_plt_addr(&reg.symbol),
                    None => Vec::new(),
                };
                res = self.hook_slots(&reg.symbol, &slots, reg.callback, reg.backup.as_deref())
                    && res;
            }
        }
        res
    }

    // 逐个替换，某个失败不影响其余 slot
    pub(crate) fn hook_slots(
        &mut self,
        symbol: &str,
        slots: &[usize],
        callback: usize,
        backup_out: Option<&AtomicPtr<c_void>>,
    ) -> bool {
        let mut res = true;
        for &addr in slots {
            match self.hook_slot(addr, callback, backup_out) {
                Ok(()) => log::debug(format_args!(
                    "hooked {} at {:#x} -> {:#x}",
                    symbol, addr, callback
                )),
                Err(err) => {
                    log::error(format_args!(
                        "hook {} at {:#x} failed: {:?}",
                        symbol, addr, err
                    ));
                    res = false;
                }
            }
        }
        res
    }

    pub(crate) fn invalidate_backup(&mut self) -> bool {
        let mut res = true;
        for region in self.regions.values_mut() {
            res = region.invalidate() && res;
        }
        res
    }
}
