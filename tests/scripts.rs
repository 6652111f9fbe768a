//! End-to-end script execution tests
//!
//! Each test pairs source text with an observable outcome: variable values
//! after execution, property state, script status, or a compile error.

use std::sync::Arc;

use jinx::{
    Runtime, ScriptStatus, Variant, Visibility,
};

fn run(source: &str) -> jinx::Script {
    Runtime::new()
        .execute_script(source, "test", &[])
        .expect("script should compile and run")
}

#[test]
fn arithmetic_uses_conventional_precedence() {
    let script = run("set x to 3 + 4 * 2\n");
    assert_eq!(script.get_variable("x"), Variant::Integer(11));
}

#[test]
fn arithmetic_mixes_integers_and_numbers() {
    let script = run("set x to 1 + 2.5\nset y to 7 / 2\nset z to 7.0 / 2\n");
    assert_eq!(script.get_variable("x"), Variant::Number(3.5));
    assert_eq!(script.get_variable("y"), Variant::Integer(3));
    assert_eq!(script.get_variable("z"), Variant::Number(3.5));
}

#[test]
fn string_concatenation_and_comparison() {
    let script = run(
        "set s to \"foo\" + \"bar\"\nset lt to \"abc\" < \"abd\"\nset eq to \"x\" = \"x\"\n",
    );
    assert_eq!(script.get_variable("s"), Variant::from("foobar"));
    assert_eq!(script.get_variable("lt"), Variant::Boolean(true));
    assert_eq!(script.get_variable("eq"), Variant::Boolean(true));
}

#[test]
fn private_property_is_inaccessible_from_importer() {
    let runtime = Runtime::new();
    runtime
        .compile("library a\nprivate p to 1\n", "a", &[])
        .unwrap();
    let err = runtime
        .compile("import a\nlibrary b\nset q to a p\n", "b", &[])
        .unwrap_err();
    assert!(err.to_string().contains("Unable to access private property"));
}

#[test]
fn public_property_is_shared_between_scripts() {
    let runtime = Runtime::new();
    let first = runtime
        .execute_script("library a\npublic counter to 10\n", "a", &[])
        .unwrap();
    assert!(first.is_finished());

    let second = runtime
        .execute_script(
            "import a\nset x to a counter + 5\n",
            "b",
            &[],
        )
        .unwrap();
    assert_eq!(second.get_variable("x"), Variant::Integer(15));

    // Host-side access by id.
    let id = runtime
        .get_library("a")
        .get_property_name("counter")
        .unwrap()
        .id();
    assert_eq!(runtime.get_property(id), Variant::Integer(10));
    runtime.set_property(id, Variant::Integer(99));
    assert_eq!(runtime.get_property(id), Variant::Integer(99));
}

#[test]
fn ambiguous_function_across_imports_fails_to_compile() {
    let runtime = Runtime::new();
    let function = "public function return my fn {x}\nreturn x\nend\n";
    runtime
        .compile(&format!("library l1\n{function}"), "l1", &[])
        .unwrap();
    runtime
        .compile(&format!("library l2\n{function}"), "l2", &[])
        .unwrap();
    assert!(runtime
        .compile("import l1\nimport l2\nset z to my fn 3\n", "main", &[])
        .is_err());
}

#[test]
fn loop_over_collection_visits_values_in_insertion_order() {
    let script = run(
        "set c to [[\"a\", 1], [\"b\", 2], [\"c\", 3]]\n\
         set total to 0\n\
         set order to \"\"\n\
         loop v over c\n\
         set total to total + v\n\
         set order to order + (v as string)\n\
         end\n",
    );
    assert_eq!(script.get_variable("total"), Variant::Integer(6));
    assert_eq!(script.get_variable("order"), Variant::from("123"));
    assert_eq!(script.stack_depth(), 0);
}

#[test]
fn loop_over_empty_collection_skips_body() {
    let script = run("set c to []\nset n to 0\nloop v over c\nset n to n + 1\nend\n");
    assert_eq!(script.get_variable("n"), Variant::Integer(0));
    assert_eq!(script.stack_depth(), 0);
}

#[test]
fn cooperative_wait_until_property() {
    let runtime = Runtime::new();
    runtime
        .execute_script("public done to false\n", "decl", &[])
        .unwrap();
    let bytecode = runtime
        .compile("wait until done\nset x to 42\n", "waiter", &[])
        .unwrap();
    let mut script = runtime.create_script(&bytecode).unwrap();

    // The guard is false, so every call parks the script again.
    assert_eq!(script.execute().unwrap(), ScriptStatus::Waiting);
    assert_eq!(script.execute().unwrap(), ScriptStatus::Waiting);

    let id = runtime
        .get_library("")
        .get_property_name("done")
        .unwrap()
        .id();
    runtime.set_property(id, Variant::Boolean(true));

    assert_eq!(script.execute().unwrap(), ScriptStatus::Finished);
    assert_eq!(script.get_variable("x"), Variant::Integer(42));
}

#[test]
fn break_leaves_counter_visible_and_falls_through() {
    let script = run(
        "set last to 0\n\
         loop i from 1 to 10\n\
         if i = 4\n\
         break\n\
         end\n\
         set last to i\n\
         end\n\
         set after to true\n",
    );
    assert_eq!(script.get_variable("i"), Variant::Integer(4));
    assert_eq!(script.get_variable("last"), Variant::Integer(3));
    assert_eq!(script.get_variable("after"), Variant::Boolean(true));
    assert_eq!(script.stack_depth(), 0);
}

#[test]
fn counter_loop_iteration_counts() {
    // (from, to, step source, expected iterations)
    let cases = [
        ("1", "10", "", 10),
        ("1", "4", " by 2", 2),
        ("10", "1", "", 10),
        ("5", "1", " by 1", 0),
        ("0", "0", "", 1),
    ];
    for (from, to, by, expected) in cases {
        let script = run(&format!(
            "set n to 0\nloop i from {from} to {to}{by}\nset n to n + 1\nend\n"
        ));
        assert_eq!(
            script.get_variable("n"),
            Variant::Integer(expected),
            "loop from {from} to {to}{by}"
        );
    }
}

#[test]
fn nested_loops_with_break() {
    let script = run(
        "set hits to 0\n\
         loop i from 1 to 3\n\
         loop j from 1 to 10\n\
         if j = 2\n\
         break\n\
         end\n\
         set hits to hits + 1\n\
         end\n\
         end\n",
    );
    // The inner loop runs one full body per outer iteration before breaking.
    assert_eq!(script.get_variable("hits"), Variant::Integer(3));
    assert_eq!(script.stack_depth(), 0);
}

#[test]
fn while_and_until_loops() {
    let script = run(
        "set n to 0\n\
         loop while n < 5\n\
         increment n\n\
         end\n\
         set m to 0\n\
         loop until m = 3\n\
         increment m\n\
         end\n",
    );
    assert_eq!(script.get_variable("n"), Variant::Integer(5));
    assert_eq!(script.get_variable("m"), Variant::Integer(3));
}

#[test]
fn post_test_loop_executes_at_least_once() {
    let script = run(
        "set n to 0\n\
         loop\n\
         increment n\n\
         end until n >= 1\n",
    );
    assert_eq!(script.get_variable("n"), Variant::Integer(1));
}

#[test]
fn function_definition_and_call() {
    let script = run(
        "public function return double {x}\n\
         return x + x\n\
         end\n\
         set r to double 21\n",
    );
    assert_eq!(script.get_variable("r"), Variant::Integer(42));
}

#[test]
fn function_with_multiple_parameters() {
    let script = run(
        "public function return sum of {a} plus {b}\n\
         return a + b\n\
         end\n\
         set r to sum of 3 plus 4\n",
    );
    assert_eq!(script.get_variable("r"), Variant::Integer(7));
}

#[test]
fn function_with_typed_parameter_casts_argument() {
    let script = run(
        "public function return stringify {string s}\n\
         return s\n\
         end\n\
         set r to stringify 42\n",
    );
    assert_eq!(script.get_variable("r"), Variant::from("42"));
}

#[test]
fn function_with_optional_name_part() {
    let script = run(
        "public function return count (the) items in {c}\n\
         set n to 0\n\
         loop v over c\n\
         increment n\n\
         end\n\
         return n\n\
         end\n\
         set c to [[1, 10], [2, 20]]\n\
         set with to count the items in c\n\
         set without to count items in c\n",
    );
    assert_eq!(script.get_variable("with"), Variant::Integer(2));
    assert_eq!(script.get_variable("without"), Variant::Integer(2));
}

#[test]
fn recursive_function() {
    let script = run(
        "public function return fact {n}\n\
         if n <= 1\n\
         return 1\n\
         else\n\
         return n * (fact (n - 1))\n\
         end\n\
         end\n\
         set r to fact 10\n",
    );
    assert_eq!(script.get_variable("r"), Variant::Integer(3_628_800));
}

#[test]
fn native_function_call() {
    let runtime = Runtime::new();
    let library = runtime.get_library("");
    library
        .register_function(
            Visibility::Public,
            &["roll", "{integer sides}"],
            true,
            Arc::new(|args| match &args[0] {
                Variant::Integer(sides) => Ok(Variant::Integer(sides / 2)),
                other => Ok(other.clone()),
            }),
        )
        .unwrap();

    let script = runtime
        .execute_script("set r to roll 6\n", "dice", &[])
        .unwrap();
    assert_eq!(script.get_variable("r"), Variant::Integer(3));
}

#[test]
fn external_variable_set_by_host() {
    let runtime = Runtime::new();
    let bytecode = runtime
        .compile("external threshold\nset ok to threshold > 5\n", "ext", &[])
        .unwrap();
    let mut script = runtime.create_script(&bytecode).unwrap();
    script.set_variable("threshold", Variant::Integer(10));
    while script.execute().unwrap() == ScriptStatus::Running {}
    assert_eq!(script.get_variable("ok"), Variant::Boolean(true));
}

#[test]
fn collection_subscript_access() {
    let script = run(
        "set c to [[\"a\", 1], [\"b\", 2]]\n\
         set c [\"a\"] to 10\n\
         set x to c [\"a\"]\n\
         set missing to c [\"zzz\"]\n\
         erase c [\"b\"]\n",
    );
    assert_eq!(script.get_variable("x"), Variant::Integer(10));
    assert_eq!(script.get_variable("missing"), Variant::Null);
    let c = script.get_variable("c");
    let collection = c.as_collection().expect("c is a collection");
    assert_eq!(collection.len(), 1);
}

#[test]
fn list_literal_uses_one_based_integer_keys() {
    let script = run("set c to 10, 20, 30\nset first to c [1]\nset last to c [3]\n");
    assert_eq!(script.get_variable("first"), Variant::Integer(10));
    assert_eq!(script.get_variable("last"), Variant::Integer(30));
}

#[test]
fn property_key_value_access() {
    let script = run(
        "public table to [[\"x\", 1]]\n\
         set table [\"y\"] to 2\n\
         set a to table [\"x\"]\n\
         set b to table [\"y\"]\n",
    );
    assert_eq!(script.get_variable("a"), Variant::Integer(1));
    assert_eq!(script.get_variable("b"), Variant::Integer(2));
}

#[test]
fn increment_and_decrement_properties() {
    let runtime = Runtime::new();
    let script = runtime
        .execute_script(
            "public hp to 100\ndecrement hp by 30\nincrement hp\nset r to hp\n",
            "battle",
            &[],
        )
        .unwrap();
    assert_eq!(script.get_variable("r"), Variant::Integer(71));
}

#[test]
fn type_operator_and_casts() {
    let script = run(
        "set x to 5\n\
         set is int to x type = integer\n\
         set s to x as string\n\
         set n to \"2.5\" as number\n",
    );
    assert_eq!(script.get_variable("is int"), Variant::Boolean(true));
    assert_eq!(script.get_variable("s"), Variant::from("5"));
    assert_eq!(script.get_variable("n"), Variant::Number(2.5));
}

#[test]
fn logic_operators_evaluate_both_sides() {
    let runtime = Runtime::new();
    let script = runtime
        .execute_script(
            "public touched to false\n\
             public function return bump\n\
             set touched to true\n\
             return true\n\
             end\n\
             set r to false and (bump)\n",
            "logic",
            &[],
        )
        .unwrap();
    assert_eq!(script.get_variable("r"), Variant::Boolean(false));
    // The right-hand side ran even though the left was already false.
    let id = runtime
        .get_library("")
        .get_property_name("touched")
        .unwrap()
        .id();
    assert_eq!(runtime.get_property(id), Variant::Boolean(true));
}

#[test]
fn erase_property() {
    let runtime = Runtime::new();
    runtime
        .execute_script("public marker to 1\nerase marker\n", "e", &[])
        .unwrap();
    let id = runtime
        .get_library("")
        .get_property_name("marker")
        .unwrap()
        .id();
    assert!(!runtime.property_exists(id));
}

#[test]
fn bytecode_is_portable_across_runtimes() {
    let source = "public function return triple {x}\nreturn x * 3\nend\nset r to triple 5\n";
    let bytecode = Runtime::new().compile(source, "portable", &[]).unwrap();

    // A fresh runtime executes the same buffer: function and property
    // registration happen through the bytecode itself.
    let runtime = Runtime::new();
    let mut script = runtime.create_script(&bytecode).unwrap();
    while script.execute().unwrap() == ScriptStatus::Running {}
    assert_eq!(script.get_variable("r"), Variant::Integer(15));
}

#[test]
fn scripts_running_concurrently_observe_shared_property() {
    let runtime = Runtime::new();
    runtime
        .execute_script("public base to 7\n", "decl", &[])
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let runtime = Arc::clone(&runtime);
        handles.push(std::thread::spawn(move || {
            let script = runtime
                .execute_script(
                    "set r to base * 2\nloop i from 1 to 100\nset r to base * 2\nend\n",
                    &format!("worker{i}"),
                    &[],
                )
                .unwrap();
            script.get_variable("r")
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Variant::Integer(14));
    }
}

#[test]
fn chained_else_if() {
    let script = run(
        "set x to 2\n\
         set r to 0\n\
         if x = 1\n\
         set r to 10\n\
         else if x = 2\n\
         set r to 20\n\
         else\n\
         set r to 30\n\
         end\n",
    );
    assert_eq!(script.get_variable("r"), Variant::Integer(20));
}

#[test]
fn begin_end_block_scopes_variables_at_compile_time() {
    let runtime = Runtime::new();
    // `inner` is out of scope after the block, so the final read fails to
    // resolve as a variable and the statement cannot compile.
    let err = runtime
        .compile("begin\nset inner to 1\nend\nset x to inner\n", "s", &[])
        .unwrap_err();
    assert!(err.to_string().contains("Expected operand"));
}

#[test]
fn wait_statement_parks_script_each_quantum() {
    let runtime = Runtime::new();
    let bytecode = runtime
        .compile("set n to 0\nwait\nincrement n\nwait\nincrement n\n", "w", &[])
        .unwrap();
    let mut script = runtime.create_script(&bytecode).unwrap();
    assert_eq!(script.execute().unwrap(), ScriptStatus::Waiting);
    assert_eq!(script.execute().unwrap(), ScriptStatus::Waiting);
    assert_eq!(script.execute().unwrap(), ScriptStatus::Finished);
    assert_eq!(script.get_variable("n"), Variant::Integer(2));
}
