//! A test binary built on the harness, used by the integration tests.
//!
//! By default it runs the `helloworld` suite: two passing cases around one
//! that writes through a null pointer. `THINGSPECTOR_DEMO=scenarios` selects
//! a suite covering every way a case can end.

use std::env;
use std::time::Duration;

use thingspector::prelude::*;
use thingspector::HarnessError;

// ============================================================================
// MODULE UNDER TEST
// ============================================================================

fn hello_world() -> &'static str {
    "Hello world"
}

fn hello_world_again() -> String {
    format!("{} again", hello_world())
}

// ============================================================================
// HELLOWORLD SUITE
// ============================================================================

#[derive(Default)]
struct Greeting {
    expected: String,
}

fn setup(fx: &mut Greeting) {
    fx.expected = "Hello world".to_string();
}

fn teardown(fx: &mut Greeting) {
    fx.expected.clear();
}

fn case_hello_world(fx: &mut Greeting) {
    expect_str!(hello_world(), fx.expected.as_str());
}

fn case_fault(_: &mut Greeting) {
    let target = std::hint::black_box(std::ptr::null_mut::<i32>());
    // SAFETY: none; this case exists to crash.
    expect_int!(unsafe { target.write_volatile(0); *target }, 0);
}

fn case_hello_world_again(fx: &mut Greeting) {
    expect_str!(hello_world_again(), format!("{} again", fx.expected));
}

// ============================================================================
// SCENARIOS SUITE
// ============================================================================

fn case_int_mismatch(_: &mut ()) {
    expect_int!(2 + 2, 5);
}

fn case_fail_then_pass(_: &mut ()) {
    expect_long!(i64::from(u32::MAX) + 1, 0);
    expect_ulong!(1u64 << 32, 4_294_967_296);
}

fn case_no_assertions(_: &mut ()) {}

fn case_panic(_: &mut ()) {
    let values: Vec<u32> = Vec::new();
    expect_uint!(values[std::hint::black_box(7)], 1);
}

fn case_abort(_: &mut ()) {
    expect!(true);
    std::process::abort();
}

fn case_divide_by_zero(_: &mut ()) {
    expect_int!(100 / std::hint::black_box(0), 0);
}

fn case_sleep(_: &mut ()) {
    std::thread::sleep(Duration::from_secs(30));
}

fn case_console(_: &mut ()) {
    println!("plain console output");
    eprintln!("diagnostic on stderr");
    expect_eq!(vec![1, 2, 3].len(), 3);
}

fn main() -> miette::Result<()> {
    if env::var("THINGSPECTOR_DEMO").as_deref() == Ok("scenarios") {
        let suite: Result<Suite<()>, HarnessError> = thingspector::suite!(
            "scenarios",
            (),
            [
                case_int_mismatch,
                case_fail_then_pass,
                case_no_assertions,
                case_panic,
                case_abort,
                case_divide_by_zero,
                case_sleep,
                case_console
            ]
        );
        thingspector::main(suite?)
    }

    let suite = thingspector::suite!(
        "helloworld",
        Greeting,
        setup,
        teardown,
        [case_hello_world, case_fault, case_hello_world_again]
    )?;
    thingspector::main(suite)
}
