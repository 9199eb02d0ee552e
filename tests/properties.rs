use std::rc::Rc;

use strum::IntoEnumIterator;
use vasm::{
    Arch, ErrorKind,
    analyze::parse_source,
    generate,
    ir::{Instruction, Operation},
    synthesize::arch::{Sizer, mcs51::Mcs51Sizer, x64::X64Sizer},
};

fn parse(source: &str) -> Vec<Instruction> {
    parse_source(Rc::new(String::from("main.ir")), source).unwrap()
}

fn sizer(arch: Arch) -> Box<dyn Sizer> {
    match arch {
        Arch::Mcs51 => Box::new(Mcs51Sizer),
        Arch::X86_64 => Box::new(X64Sizer),
    }
}

/// Every operation both architectures accept, with valid operands for each.
const COMMON: &str = "
top:
    mov r0, 5
    mov r1, r0
    load r2, [r1]
    store [r0], r2
    store [r1], 7
    add r0, r1
    sub r0, 1
    and r0, 0x0F
    or r0, r1
    xor r0, -1
    not r2
    neg r2
    shl r3, 2
    shr r3, 1
    cmp r0, r1
    cmp r0, 4
branches:
    je branches
    jne branches
    jl branches
    jg branches
    jle branches
    jge branches
    jmp top
    call top
    push r4
    pop r4
    mul r0, r1
    mul r0, 3
    div r0, 3
    div r2, r1
    mod r0, r1
    mod r3, 6
    inc r5
    dec r5
    var x, 9
    buffer buf, 4
    set x, r0
    set x, 1
    get r6, x
    get r7, buf
    org 0x200
    nop
    ret
    halt
";

const MCS51_ONLY: &str = "
bits:
    setb 0x90
    clrb 0x90
    cplb 0x90
    jb 0x90, bits
    jnb 0x90, bits
    djnz r7, bits
";

fn program(arch: Arch) -> String {
    match arch {
        Arch::Mcs51 => format!("{}{}", COMMON, MCS51_ONLY),
        Arch::X86_64 => format!("{}    int 0x80\n", COMMON),
    }
}

#[test]
fn emitted_size_matches_sizer() {
    for arch in Arch::iter() {
        let ir = parse(&program(arch));
        let sizer = sizer(arch);

        let mut expected = 0;
        for instr in &ir {
            match &instr.op {
                Operation::Org { address } => expected = *address as usize,
                op => expected += sizer.size_of(op).unwrap(),
            }
        }

        let assembly = generate(arch, &ir).unwrap();
        assert_eq!(assembly.code_size, expected, "{}", arch);
        assert_eq!(assembly.instructions().len(), expected, "{}", arch);
    }
}

#[test]
fn generation_is_deterministic() {
    for arch in Arch::iter() {
        let ir = parse(&program(arch));
        let first = generate(arch, &ir).unwrap();
        let second = generate(arch, &ir).unwrap();

        assert_eq!(first.code, second.code, "{}", arch);
        assert_eq!(first.ram, second.ram, "{}", arch);
        assert_eq!(first.symbols.sorted(), second.symbols.sorted(), "{}", arch);
    }
}

#[test]
fn duplicate_label_far_apart() {
    for arch in Arch::iter() {
        let source = format!("start:\n{}start:\nret\n", "nop\n".repeat(500));
        let err = generate(arch, &parse(&source)).unwrap_err();

        assert_eq!(err.pos.line, 502);
        assert_eq!(
            err.kind,
            ErrorKind::DuplicateSymbol {
                name: "start".into()
            }
        );
    }
}

#[test]
fn duplicate_variable_far_apart() {
    for arch in Arch::iter() {
        let source = format!("var count, 1\n{}var count\n", "nop\n".repeat(300));
        let err = generate(arch, &parse(&source)).unwrap_err();

        assert_eq!(err.pos.line, 302);
        assert_eq!(
            err.kind,
            ErrorKind::DuplicateSymbol {
                name: "count".into()
            }
        );
    }
}

#[test]
fn variable_and_label_share_a_namespace() {
    for arch in Arch::iter() {
        let err = generate(arch, &parse("buf:\nbuffer buf, 2\n")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol { name: "buf".into() });
    }
}

#[test]
fn initial_values_are_visible() {
    for arch in Arch::iter() {
        let assembly = generate(arch, &parse("var a, 100\nvar b\nret\n")).unwrap();

        assert_eq!(assembly.read_variable("a"), Some(100), "{}", arch);
        assert_eq!(assembly.read_variable("b"), Some(0), "{}", arch);
    }
}

#[test]
fn negative_initial_values() {
    let ir = parse("var x, -1\nret\n");

    let mcs51 = generate(Arch::Mcs51, &ir).unwrap();
    assert_eq!(mcs51.read_variable("x"), Some(0xFF));

    let x64 = generate(Arch::X86_64, &ir).unwrap();
    assert_eq!(x64.read_variable("x"), Some(-1));
}

#[test]
fn org_cannot_move_backwards() {
    for arch in Arch::iter() {
        let err = generate(arch, &parse("org 0x10\nnop\norg 0x08\n")).unwrap_err();

        assert_eq!(err.pos.line, 3);
        assert_eq!(
            err.kind,
            ErrorKind::AddressBackwards {
                target: 8,
                current: 0x11
            }
        );
    }
}

#[test]
fn empty_program() {
    for arch in Arch::iter() {
        let assembly = generate(arch, &[]).unwrap();
        assert!(assembly.code.is_empty());
        assert!(assembly.symbols.is_empty());
    }
}
