// 页面级内存操作：预留、整段搬移、匿名重建、拷贝、权限修改与 slot 读写
// 所有直接触碰进程内存的 unsafe 操作集中在此模块

use crate::errno::Errno;
use crate::log;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn is_page_aligned(value: usize) -> bool {
    let page_size = page_size();
    page_size != 0 && value & (page_size - 1) == 0
}

// 地址所在页的起始地址
pub fn page_start(addr: usize) -> usize {
    addr & !(page_size() - 1)
}

fn check_range(addr: usize, len: usize) -> Result<(), Errno> {
    if addr == 0 || len == 0 || !is_page_aligned(addr) || !is_page_aligned(len) {
        log::error(format_args!(
            "unaligned page range {:#x}+{:#x}",
            addr, len
        ));
        return Err(Errno::InvalidArg);
    }
    Ok(())
}

fn last_os_error() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

// 预留一段不可访问的匿名映射，地址由内核决定
pub fn reserve(len: usize) -> Result<usize, Errno> {
    if len == 0 || !is_page_aligned(len) {
        return Err(Errno::InvalidArg);
    }
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        log::error(format_args!("reserve {:#x} bytes failed: {}", len, last_os_error()));
        return Err(Errno::Mmap);
    }
    Ok(addr as usize)
}

pub fn release(addr: usize, len: usize) {
    if addr == 0 || len == 0 {
        return;
    }
    if unsafe { libc::munmap(addr as *mut libc::c_void, len) } != 0 {
        log::warn(format_args!(
            "munmap {:#x}+{:#x} failed: {}",
            addr,
            len,
            last_os_error()
        ));
    }
}

// 将 [from, from+len) 的页面整体搬到 to，to 处原有映射被替换，from 处变为未映射
// 直接走 mremap 系统调用，部分 libc 封装不支持 MREMAP_FIXED
pub fn move_pages(from: usize, len: usize, to: usize) -> Result<(), Errno> {
    check_range(from, len)?;
    check_range(to, len)?;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_mremap,
            from as *mut libc::c_void,
            len,
            len,
            libc::MREMAP_MAYMOVE | libc::MREMAP_FIXED,
            to as *mut libc::c_void,
        )
    };
    if ret == -1 {
        log::error(format_args!(
            "mremap {:#x} -> {:#x} ({:#x} bytes) failed: {}",
            from,
            to,
            len,
            last_os_error()
        ));
        return Err(Errno::Mremap);
    }
    if ret as usize != to {
        log::error(format_args!(
            "mremap {:#x} landed at {:#x}, expected {:#x}",
            from, ret as usize, to
        ));
        return Err(Errno::RemapMoved);
    }
    Ok(())
}

// 在固定地址重建私有匿名映射
pub fn map_anonymous_fixed(addr: usize, len: usize, prot: i32) -> Result<(), Errno> {
    check_range(addr, len)?;
    let mapped = unsafe {
        libc::mmap(
            addr as *mut libc::c_void,
            len,
            prot,
            libc::MAP_PRIVATE | libc::MAP_FIXED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if mapped == libc::MAP_FAILED {
        log::error(format_args!(
            "mmap fixed {:#x}+{:#x} failed: {}",
            addr,
            len,
            last_os_error()
        ));
        return Err(Errno::Mmap);
    }
    if mapped as usize != addr {
        release(mapped as usize, len);
        return Err(Errno::RemapMoved);
    }
    Ok(())
}

// 按页拷贝，src 需可读、dst 需可写，两段不重叠
pub unsafe fn copy_pages(src: usize, dst: usize, len: usize) {
    std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len);
}

pub fn protect(addr: usize, len: usize, prot: i32) -> Result<(), Errno> {
    let start = page_start(addr);
    let len = len + (addr - start);
    if unsafe { libc::mprotect(start as *mut libc::c_void, len, prot) } != 0 {
        log::error(format_args!(
            "mprotect {:#x}+{:#x} prot={} failed: {}",
            start,
            len,
            prot,
            last_os_error()
        ));
        return Err(Errno::Mprotect);
    }
    Ok(())
}

// slot 为指针大小且自然对齐，按原子方式读写，保证其他线程看到完整指针
pub unsafe fn read_slot(addr: usize) -> usize {
    (*(addr as *const AtomicUsize)).load(Ordering::SeqCst)
}

pub unsafe fn write_slot(addr: usize, value: usize) {
    (*(addr as *const AtomicUsize)).store(value, Ordering::SeqCst);
    flush_instruction_cache_range(page_start(addr), page_start(addr) + page_size());
}

// 刷新指定地址范围的指令缓存
pub fn flush_instruction_cache_range(start: usize, end: usize) {
    if start >= end {
        return;
    }
    flush_instruction_cache_impl(start, end);
}

// aarch64: 逐行清理 dcache 再逐行无效化 icache，最后 dsb+isb 同步
// x86_64: 硬件保证缓存一致性，仅需内存屏障
fn flush_instruction_cache_impl(start: usize, end: usize) {
    #[cfg(target_arch = "aarch64")]
    {
        let (dcache_line, icache_line) = cache_line_size();
        let mut dcache_addr = align_down(start, dcache_line);
        while dcache_addr < end {
            unsafe {
                core::arch::asm!("dc cvau, {}", in(reg) dcache_addr, options(nostack, preserves_flags));
            }
            dcache_addr = dcache_addr.saturating_add(dcache_line);
        }
        unsafe {
            core::arch::asm!("dsb ish", options(nostack, preserves_flags));
        }

        let mut icache_addr = align_down(start, icache_line);
        while icache_addr < end {
            unsafe {
                core::arch::asm!("ic ivau, {}", in(reg) icache_addr, options(nostack, preserves_flags));
            }
            icache_addr = icache_addr.saturating_add(icache_line);
        }
        unsafe {
            core::arch::asm!("dsb ish", options(nostack, preserves_flags));
            core::arch::asm!("isb", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    {
        let _ = (start, end);
        std::sync::atomic::fence(Ordering::SeqCst);
    }
}

// 读取 CTR_EL0 寄存器，返回 (dcache_line_size, icache_line_size)
#[cfg(target_arch = "aarch64")]
fn cache_line_size() -> (usize, usize) {
    let ctr_el0: usize;
    unsafe {
        core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr_el0, options(nomem, nostack, preserves_flags));
    }

    let dcache_line = 4usize << ((ctr_el0 >> 16) & 0x0f);
    let icache_line = 4usize << (ctr_el0 & 0x0f);
    (dcache_line.max(4), icache_line.max(4))
}

#[cfg(target_arch = "aarch64")]
fn align_down(addr: usize, align: usize) -> usize {
    let mask = !(align.saturating_sub(1));
    addr & mask
}
