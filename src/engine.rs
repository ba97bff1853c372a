// hook 引擎：注册队列 + 区间注册表，commit 时重新扫描 maps 并批量替换 slot
use crate::log;
use crate::maps::{MapInfo, MapsSource, ProcMaps};
use std::ffi::c_void;
use std::mem;
use std::sync::Mutex;

mod registry;
mod state;

#[cfg(test)]
mod tests;

pub use registry::RegionSnapshot;
pub use state::{BackupSlot, new_backup_slot};

use registry::RegionRegistry;
use state::{EngineState, HookTarget, MutexPoisonRecover, PendingHook};

pub struct PltHookEngine {
    state: Mutex<EngineState>,
    source: Box<dyn MapsSource>,
}

impl Default for PltHookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PltHookEngine {
    pub fn new() -> Self {
        Self::with_source(ProcMaps::default())
    }

    pub fn with_source<S: MapsSource + 'static>(source: S) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            source: Box::new(source),
        }
    }

    pub fn scan(&self) -> Vec<MapInfo> {
        self.source.scan()
    }

    // 按 inode 匹配目标库的所有映射
    pub fn register_hook(
        &self,
        inode: u64,
        symbol: &str,
        callback: *mut c_void,
        backup: Option<BackupSlot>,
    ) -> bool {
        self.push(HookTarget::by_inode(inode), symbol, callback, backup)
    }

    // 同时比较设备号，避免不同分区上 inode 相同的文件被误匹配
    pub fn register_hook_on_device(
        &self,
        dev: u64,
        inode: u64,
        symbol: &str,
        callback: *mut c_void,
        backup: Option<BackupSlot>,
    ) -> bool {
        if dev == 0 || inode == 0 {
            return false;
        }
        let target = HookTarget {
            dev: Some(dev),
            ..HookTarget::by_inode(inode)
        };
        self.push(target, symbol, callback, backup)
    }

    // 库位于某个容器文件内部时，用 [offset, offset+size) 限定它的映射
    #[allow(clippy::too_many_arguments)]
    pub fn register_hook_in_range(
        &self,
        dev: u64,
        inode: u64,
        offset: usize,
        size: usize,
        symbol: &str,
        callback: *mut c_void,
        backup: Option<BackupSlot>,
    ) -> bool {
        if dev == 0 || inode == 0 || size == 0 {
            return false;
        }
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        let target = HookTarget {
            dev: Some(dev),
            inode,
            offset_range: offset..end,
        };
        self.push(target, symbol, callback, backup)
    }

    fn push(
        &self,
        target: HookTarget,
        symbol: &str,
        callback: *mut c_void,
        backup: Option<BackupSlot>,
    ) -> bool {
        if symbol.is_empty() || callback.is_null() {
            return false;
        }
        log::info(format_args!(
            "register hook {} inode={} dev={:?} -> {:p}",
            symbol, target.inode, target.dev, callback
        ));
        self.state.lock_or_poison().pending.push(PendingHook {
            target,
            symbol: symbol.to_string(),
            callback: callback as usize,
            backup,
        });
        true
    }

    // 应用全部待提交注册，所有 slot 都替换成功时返回 true
    pub fn commit_hook(&self) -> bool {
        let mut state = self.state.lock_or_poison();
        if state.pending.is_empty() {
            return true;
        }

        let maps = self.source.scan();
        if maps.is_empty() {
            log::error(format_args!(
                "maps scan is empty, dropping {} registrations",
                state.pending.len()
            ));
            state.pending.clear();
            return false;
        }

        let mut registry = RegionRegistry::from_maps(maps).filter(&state.pending);
        registry.merge(mem::take(&mut state.registry));
        log::debug(format_args!("{} regions tracked", registry.len()));

        let mut pending = mem::take(&mut state.pending);
        let res = registry.apply(&mut pending);
        state.registry = registry;

        for reg in &pending {
            log::debug(format_args!(
                "no elf region for {} inode={}",
                reg.symbol, reg.target.inode
            ));
        }
        res
    }

    // 放弃所有备份，当前生效的 slot 值保留在原始映射中
    pub fn invalidate_backup(&self) -> bool {
        let mut state = self.state.lock_or_poison();
        if state.registry.is_empty() {
            return true;
        }
        let res = state.registry.invalidate_backup();
        log::info(format_args!("invalidate backup: {}", res));
        res
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock_or_poison().pending.len()
    }

    pub fn tracked_regions(&self) -> Vec<RegionSnapshot> {
        self.state.lock_or_poison().registry.snapshot()
    }
}

impl Drop for PltHookEngine {
    fn drop(&mut self) {
        self.invalidate_backup();
    }
}
