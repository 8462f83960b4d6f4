//! Minimal console writer.
//!
//! The real byte-output routine (UART, SBI console, whatever the boot
//! environment offers) lives outside this crate and registers itself as
//! a [`ConsoleIf`] implementation.

use core::fmt::{self, Write};

use crate_interface::call_interface;

#[crate_interface::def_interface]
pub trait ConsoleIf {
    fn putchar(c: u8);
}

struct Console;

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.as_bytes() {
            call_interface!(ConsoleIf::putchar(*c));
        }
        Ok(())
    }
}

pub fn console_print(args: fmt::Arguments<'_>) {
    Console.write_fmt(args).unwrap();
}
