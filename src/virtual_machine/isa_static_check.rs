//! Pins the opcode table.
//!
//! Assembled programs bake opcode bytes and operand layouts in, so any edit to
//! the table has to show up here as a deliberate fingerprint update.

use crate::virtual_machine::isa::Instruction;
use std::fmt::Write;

/// FNV-1a fingerprint of [`render_table`].
const TABLE_FINGERPRINT: u64 = 0x144b_1704_1ada_8f39;

fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

macro_rules! render_entries {
    (
        $( $(#[$doc:meta])* $name:ident = $opcode:literal, $mnemonic:literal => [ $( $field:ident : $kind:ident ),* $(,)? ], $privileged:expr ),* $(,)?
    ) => {{
        let mut out = String::new();
        $(
            let kinds: &[&str] = &[$( stringify!($kind) ),*];
            let _ = writeln!(
                out,
                "{:02X} {} {} {}",
                $opcode,
                $mnemonic,
                if kinds.is_empty() { "-".to_string() } else { kinds.join(",") },
                if $privileged { "P" } else { "-" },
            );
        )*
        out
    }};
}

/// One line per opcode: `OP MNEMONIC KINDS PRIV`.
fn render_table() -> String {
    crate::for_each_instruction!(render_entries)
}

#[test]
#[ignore]
fn print_table_fingerprint() {
    print!("{}", render_table());
    println!("fingerprint = {:#x}", fnv1a64(render_table().as_bytes()));
}

#[test]
fn table_fingerprint_unchanged() {
    assert_eq!(fnv1a64(render_table().as_bytes()), TABLE_FINGERPRINT);
}

#[test]
fn rendering_matches_decoder() {
    let table = render_table();
    for (line, instr) in table.lines().zip(Instruction::ALL) {
        let mut cols = line.split(' ');
        let opcode = cols.next().and_then(|c| u8::from_str_radix(c, 16).ok());
        assert_eq!(opcode, Some(*instr as u8));
        assert_eq!(cols.next(), Some(instr.mnemonic()));
        let privileged = line.ends_with(" P");
        assert_eq!(privileged, instr.is_privileged(), "{line}");
    }
}
