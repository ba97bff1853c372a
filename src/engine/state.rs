// engine 的锁内状态：待提交的注册队列与已跟踪的映射区间
use crate::maps::MapInfo;
use std::ffi::c_void;
use std::ops::Range;
use std::sync::atomic::AtomicPtr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::registry::RegionRegistry;

// 提交后写入原函数指针；未发生替换时保持原值（初始为 null）
pub type BackupSlot = Arc<AtomicPtr<c_void>>;

pub fn new_backup_slot() -> BackupSlot {
    Arc::new(AtomicPtr::new(std::ptr::null_mut()))
}

// Mutex poison 恢复扩展，避免持锁线程 panic 后引发连锁 panic
pub(crate) trait MutexPoisonRecover<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexPoisonRecover<T> for Mutex<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// 目标库的定位条件：dev 为 None 时只比较 inode
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct HookTarget {
    pub(crate) dev: Option<u64>,
    pub(crate) inode: u64,
    // 库在文件内的偏移范围，从压缩包直接加载的库只认这一段
    pub(crate) offset_range: Range<usize>,
}

impl HookTarget {
    pub(crate) fn by_inode(inode: u64) -> Self {
        Self {
            dev: None,
            inode,
            offset_range: 0..usize::MAX,
        }
    }

    pub(crate) fn matches(&self, info: &MapInfo) -> bool {
        info.inode == self.inode
            && self.dev.is_none_or(|dev| dev == info.dev)
            && self.offset_range.contains(&info.offset)
    }

    // ELF 头所在映射：文件偏移等于范围起点
    pub(crate) fn is_elf_region(&self, info: &MapInfo) -> bool {
        info.offset == self.offset_range.start && self.matches(info)
    }
}

// 一次 register_hook 调用，commit 时无论成败都会被消费
pub(crate) struct PendingHook {
    pub(crate) target: HookTarget,
    pub(crate) symbol: String,
    pub(crate) callback: usize,
    pub(crate) backup: Option<BackupSlot>,
}

#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) pending: Vec<PendingHook>,
    pub(crate) registry: RegionRegistry,
}
