//! Black-box tests over `compile_source`. This environment has no
//! assembler/linker available to actually run the compiled programs and
//! check their exit codes, so each scenario is checked structurally
//! instead — asserting the generated assembly contains the instruction
//! sequence that realizes the expected arithmetic or control flow.

use std::collections::HashSet;

use ninccc::compile_source;

fn compile_ok(src: &str) -> String {
    compile_source(src).unwrap_or_else(|e| panic!("expected {src:?} to compile, got: {e}"))
}

/// Every label definition line (`name:`), in source order. Directives
/// (`.globl`, `.data`, ...) and instructions are excluded.
fn label_definitions(asm: &str) -> Vec<&str> {
    asm.lines().filter(|l| l.ends_with(':')).map(|l| l.trim_end_matches(':')).collect()
}

#[test]
fn scenario_1_return_constant() {
    let asm = compile_ok("int main() { return 42; }");
    assert!(asm.contains(".intel_syntax noprefix"));
    assert!(asm.contains(".globl main"));
    assert!(asm.contains("mov rax, 42"));
    assert!(asm.contains(".L.return.main:"));
}

#[test]
fn scenario_2_locals_and_arithmetic() {
    let asm = compile_ok("int main() { int a=3; int b=4; return a*a + b*b; }");
    assert!(asm.contains("imul eax, edi"));
    assert!(asm.contains("add eax, edi"));
    assert!(asm.contains("sub rsp,"));
}

#[test]
fn scenario_3_recursive_call() {
    let asm = compile_ok(
        "int fib(int n){ if (n<2) return n; return fib(n-1)+fib(n-2); } int main(){ return fib(10); }",
    );
    assert!(asm.contains(".globl fib"));
    assert!(asm.contains(".globl main"));
    assert!(asm.contains("call fib"));
    assert!(asm.contains("setl al"));
}

#[test]
fn scenario_4_global_array_initializer() {
    let asm = compile_ok("int a[3]={1,2,4}; int main(){ return a[0]+a[1]+a[2]; }");
    assert!(asm.contains(".globl a"));
    assert!(asm.contains(".data"));
    assert!(asm.contains(".byte 1"));
    assert!(asm.contains(".byte 2"));
    assert!(asm.contains(".byte 4"));
}

#[test]
fn scenario_5_string_literal() {
    let asm = compile_ok("int main(){ char *s=\"abc\"; return s[0]+s[1]+s[2]; }");
    assert!(asm.contains(".byte 97"));
    assert!(asm.contains(".byte 98"));
    assert!(asm.contains(".byte 99"));
    assert!(asm.contains("movsx eax, BYTE PTR [rax]"));
}

#[test]
fn scenario_6_struct_members() {
    let asm = compile_ok(
        "struct P{int x; int y;}; int main(){ struct P p; p.x=3; p.y=4; return p.x*p.x+p.y*p.y; }",
    );
    assert!(asm.contains("add rax, 4"));
    assert!(asm.contains("mov [rdi], eax"));
}

#[test]
fn scenario_7_for_loop() {
    let asm = compile_ok("int main(){ int x=0; for(int i=0;i<10;i=i+1) x=x+i; return x; }");
    assert!(asm.contains(".L.start."));
    let starts = asm.matches(".L.start.").count();
    assert!(starts >= 2, "loop top label should be both defined and jumped back to");
}

#[test]
fn scenario_8_switch() {
    let asm = compile_ok(
        "int main(){ int x=1; switch(2){ case 1: x=10; break; case 2: x=20; break; default: x=99; } return x; }",
    );
    // The scrutinee `2` is `int`-typed, so the cascade compares at `eax`.
    assert!(asm.contains("cmp eax, 1"));
    assert!(asm.contains("cmp eax, 2"));
    assert!(asm.contains("jmp .L.end.") || asm.contains("jmp .L."));
}

#[test]
fn every_label_definition_is_unique() {
    // Every `.globl`/`.local` label should appear exactly once as a
    // definition in the output.
    let asm = compile_ok(
        "int fib(int n){ if (n<2) return n; return fib(n-1)+fib(n-2); } \
         int main(){ int x=0; for(int i=0;i<3;i=i+1) { if (i==1) x=x+1; else x=x+2; } return x+fib(5); }",
    );
    let labels = label_definitions(&asm);
    let mut seen = HashSet::new();
    for label in &labels {
        assert!(seen.insert(*label), "label {label} was defined more than once");
    }
}

#[test]
fn stack_size_is_always_16_byte_aligned() {
    // Every function's reserved stack size must stay 16-byte aligned.
    let asm = compile_ok(
        "struct Agg { int a; char b; }; int main(){ char c; short s; int i; long l; struct Agg agg; return 0; }",
    );
    for line in asm.lines() {
        if let Some(rest) = line.trim().strip_prefix("sub rsp, ") {
            let n: i64 = rest.trim().parse().expect("stack size should be a plain integer");
            assert_eq!(n % 16, 0, "stack_size {n} is not 16-byte aligned");
        }
    }
}

#[test]
fn variadic_call_masks_narrow_return_and_saves_registers() {
    let asm = compile_ok(
        "int printf(char *fmt, ...); int main(){ printf(\"%d\\n\", 7); return 0; }",
    );
    assert!(asm.contains("call printf"));
    assert!(asm.contains("mov rax, 0"));
}

#[test]
fn switch_on_a_narrow_scrutinee_compares_at_its_own_width() {
    // A `cmp rax, N` against a scrutinee that loaded into `eax` (zero-
    // extending, not sign-extending, the top 32 bits of `rax`) would
    // never match a negative case value's sign-extended immediate.
    let asm = compile_ok(
        "int main(){ int x = -1; switch(x){ case -1: return 1; default: return 0; } }",
    );
    assert!(asm.contains("cmp eax, -1"), "expected a 32-bit compare, got:\n{asm}");
    assert!(!asm.contains("cmp rax, -1"), "switch widened to a 64-bit compare:\n{asm}");
}

#[test]
fn goto_and_labeled_statement_share_one_target() {
    let asm = compile_ok("int main(){ int i=0; loop: i=i+1; if (i<3) goto loop; return i; }");
    let labels = label_definitions(&asm);
    let mut seen = HashSet::new();
    for label in &labels {
        assert!(seen.insert(*label), "label {label} was defined more than once");
    }
    assert!(asm.contains("jmp"));
}

#[test]
fn comparison_between_an_int_variable_and_a_small_literal_stays_32_bit() {
    // A bare literal like `0` must be typed `int`, not `long`, or this
    // comparison gets promoted to a 64-bit `cmp rax, rdi` and a negative
    // `int` value (zero-extended by the 32-bit load) compares as a huge
    // positive number instead of a negative one.
    let asm = compile_ok("int main(){ int a = -1; return a < 0; }");
    assert!(asm.contains("cmp eax, edi"), "expected a 32-bit compare, got:\n{asm}");
    assert!(!asm.contains("cmp rax, rdi"), "int-vs-literal compare widened to 64 bits:\n{asm}");
}

#[test]
fn rejects_use_of_undeclared_identifier() {
    let err = compile_source("int main() { return nope; }").unwrap_err();
    assert!(err.to_string().contains("nope") || !err.to_string().is_empty());
}

#[test]
fn rejects_break_outside_loop_or_switch() {
    assert!(compile_source("int main() { break; return 0; }").is_err());
}

#[test]
fn partial_local_array_initializer_zeroes_the_slot_first() {
    let asm = compile_ok("int main(){ int a[3]={1,2}; return a[2]; }");
    assert!(asm.contains("rep stosb"));
    let memzero_pos = asm.find("rep stosb").unwrap();
    let first_store_pos = asm.find("mov [rdi], eax").unwrap_or(asm.len());
    assert!(memzero_pos < first_store_pos, "slot must be zeroed before element assignments run");
}

#[test]
fn scalar_local_initializer_skips_the_memzero() {
    let asm = compile_ok("int main(){ int a=3; return a; }");
    assert!(!asm.contains("rep stosb"));
}
