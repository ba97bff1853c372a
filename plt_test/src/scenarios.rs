mod basic;
mod filters;
mod instance;

pub unsafe fn run_all() {
    run("single", basic::scenario_single_hook_unhook);
    run("shared-backup", basic::scenario_shared_backup);
    run("invalidate", basic::scenario_invalidate_backup);
    run("rejected-registration", filters::scenario_rejected_registration);
    run("no-match", filters::scenario_no_match_is_consumed);
    run("missing-symbol", filters::scenario_missing_symbol);
    run("device-range", filters::scenario_device_and_range);
    run("engine-instance", instance::scenario_engine_instance);
}

unsafe fn run(name: &str, scenario: unsafe fn()) {
    println!("scenario: {name}");
    scenario();
}
