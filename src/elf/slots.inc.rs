// 按符号收集 PLT/GOT slot 地址，通过 include! 嵌入 elf.rs

impl Elf {
    // 返回引用 symbol 的全部 slot 地址（升序去重），符号不存在或视图无效时为空
    pub fn find_plt_addr(&self, symbol: &str) -> Vec<usize> {
        let Some(tables) = self.tables.as_ref() else {
            return Vec::new();
        };
        if symbol.is_empty() {
            return Vec::new();
        }
        match unsafe { tables.collect_slots(self.base_addr, symbol) } {
            Ok(slots) => slots.into_iter().collect(),
            Err(err) => {
                log::warn(format_args!(
                    "collect slots of {} at {:#x} failed: {:?}",
                    symbol, self.base_addr, err
                ));
                Vec::new()
            }
        }
    }
}

impl ElfTables {
    unsafe fn collect_slots(&self, base_addr: usize, symbol: &str) -> Result<BTreeSet<usize>, Errno> {
        let mut slots = BTreeSet::new();
        let Some(symidx) = self.find_symidx(symbol) else {
            return Ok(slots);
        };
        log::debug(format_args!("found {} at symidx {}", symbol, symidx));

        // .rel(a).plt 只认 JUMP_SLOT，.rel(a).dyn 与 packed 认 GLOB_DAT / ABS
        self.for_each_reloc(self.relplt, self.relplt_sz, |r_offset, r_info| {
            self.collect_slot(&mut slots, base_addr, true, symidx, r_offset, r_info)
        })?;
        self.for_each_reloc(self.reldyn, self.reldyn_sz, |r_offset, r_info| {
            self.collect_slot(&mut slots, base_addr, false, symidx, r_offset, r_info)
        })?;

        if self.relandroid != 0 {
            let data = slice::from_raw_parts(self.relandroid as *const u8, self.relandroid_sz);
            for reloc in PackedRelocIterator::new(data, self.is_use_rela)? {
                let reloc = reloc?;
                self.collect_slot(&mut slots, base_addr, false, symidx, reloc.r_offset, reloc.r_info)?;
            }
        }

        Ok(slots)
    }

    // 遍历 REL 或 RELA 表，回调收到 (r_offset, r_info)
    unsafe fn for_each_reloc<F>(&self, table: usize, size: usize, mut f: F) -> Result<(), Errno>
    where
        F: FnMut(usize, ElfXword) -> Result<(), Errno>,
    {
        if table == 0 || size == 0 {
            return Ok(());
        }
        if self.is_use_rela {
            let cnt = size / mem::size_of::<ElfRela>();
            for rela in slice::from_raw_parts(table as *const ElfRela, cnt) {
                f(rela.r_offset as usize, rela.r_info)?;
            }
        } else {
            let cnt = size / mem::size_of::<ElfRel>();
            for rel in slice::from_raw_parts(table as *const ElfRel, cnt) {
                f(rel.r_offset as usize, rel.r_info)?;
            }
        }
        Ok(())
    }

    fn collect_slot(
        &self,
        slots: &mut BTreeSet<usize>,
        base_addr: usize,
        is_plt: bool,
        symidx: u32,
        r_offset: usize,
        r_info: ElfXword,
    ) -> Result<(), Errno> {
        if elf_r_sym(r_info) != symidx {
            return Ok(());
        }
        let r_type = elf_r_type(r_info);
        if is_plt && r_type != R_GENERIC_JUMP_SLOT {
            return Ok(());
        }
        if !is_plt && r_type != R_GENERIC_GLOB_DAT && r_type != R_GENERIC_ABS {
            return Ok(());
        }

        let addr = self.bias_addr.wrapping_add(r_offset);
        if addr < base_addr {
            return Err(Errno::Format);
        }
        slots.insert(addr);
        Ok(())
    }
}
