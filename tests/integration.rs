
use std::any::TypeId;
use std::sync::Arc;
use std::thread;

use fixtures::{MemorySource, generate_random_whitespace, generate_random_whitespace_at_least_one, vars};
use liquette::{
    CachingSource, Context, Engine, ErrorMode, Filters, Hash, LiquidDrop, LiquidError,
    LocalFileSystem, MemberCache, Members, NamingConvention, ParseErrorKind, ParseOptions, Render,
    RenderOptions, TagBuilder, TagRegistry, Template, Value, custom,
};

#[derive(Debug)]
struct Product {
    title: &'static str,
    tags: Vec<&'static str>,
}

impl LiquidDrop for Product {
    fn members(members: &mut Members<Self>) {
        members
            .readable("Title", |p| Value::from(p.title))
            .readable("ProductTags", |p| Value::from(p.tags.clone()));
    }
}

#[derive(Debug)]
struct BaseItem {
    id: i64,
}

impl LiquidDrop for BaseItem {
    fn members(members: &mut Members<Self>) {
        members
            .readable("Id", |b| Value::Int(b.id))
            .readable("Name", |_| Value::from("base"))
            .readable("Secret", |_| Value::from("hidden"))
            .protect("Secret");
    }
}

#[derive(Debug)]
struct DerivedItem {
    base: BaseItem,
}

impl LiquidDrop for DerivedItem {
    fn members(members: &mut Members<Self>) {
        members
            .inherit(|d: &Self| &d.base)
            .readable("Name", |_| Value::from("derived"));
    }
}

/// Answers any member name from its own table.
#[derive(Debug)]
struct Translations {
    locale: &'static str,
    phrases: Hash,
}

impl LiquidDrop for Translations {
    fn members(members: &mut Members<Self>) {
        members.readable("Locale", |t| Value::from(t.locale));
    }

    fn catch_all(&self, name: &str, _context: &Context) -> Option<Value> {
        self.phrases.get(name).cloned()
    }
}

#[derive(Debug)]
struct Shelf(Vec<&'static str>);

impl LiquidDrop for Shelf {
    fn members(members: &mut Members<Self>) {
        members.readable("Owner", |_| Value::from("ada"));
    }

    fn iterate(&self) -> Option<Vec<Value>> {
        Some(self.0.iter().copied().map(Value::from).collect())
    }
}

/// Reports the scope depth of the context resolving it.
#[derive(Debug)]
struct DepthReporter;

impl LiquidDrop for DepthReporter {
    fn members(members: &mut Members<Self>) {
        members.callable("Depth", |_, context| Value::from(context.scope_depth()));
    }
}

fn engine_with(templates: &[(&str, &str)]) -> Engine {
    let mut engine = Engine::new();
    for (name, text) in templates {
        engine.add_template(*name, *text).unwrap();
    }
    engine
}

fn rethrow() -> RenderOptions {
    RenderOptions::default().with_error_mode(ErrorMode::Rethrow)
}

#[test]
#[ntest::timeout(200)]
fn test_layout_inheritance_three_levels() {
    let engine = engine_with(&[
        (
            "outer",
            "{% block start %}{% endblock %}A{% block outer %}{% endblock %}Z",
        ),
        (
            "inner",
            "{% extends 'outer' %}{% block outer %}B{% block middle %}{% endblock %}Y{% endblock %}",
        ),
        ("page", "{% extends 'inner' %}{% block middle %}C{% endblock %}"),
    ]);

    let first = engine.render("page", &Hash::new()).unwrap();
    let second = engine.render("page", &Hash::new()).unwrap();
    assert_eq!(first, "ABCYZ");
    assert_eq!(first, second, "rendering must not leave state behind");
}

#[test]
#[ntest::timeout(200)]
fn test_block_super_renders_parent_definition() {
    let engine = engine_with(&[
        ("base", "<{% block body %}base{% endblock %}>"),
        (
            "middle",
            "{% extends 'base' %}{% block body %}mid({{ block.super }}){% endblock %}",
        ),
        (
            "page",
            "{% extends 'middle' %}{% block body %}top({{ block.super }}){% endblock %}",
        ),
    ]);
    assert_eq!(
        engine.render("page", &Hash::new()).unwrap(),
        "<top(mid(base))>"
    );
    assert_eq!(engine.render("base", &Hash::new()).unwrap(), "<base>");
}

#[test]
#[ntest::timeout(200)]
fn test_unoverridden_blocks_keep_their_default() {
    let engine = engine_with(&[
        ("base", "{% block head %}H{% endblock %}|{% block body %}B{% endblock %}"),
        ("page", "  {% extends 'base' %}ignored{% block body %}b{% endblock %}ignored"),
    ]);
    assert_eq!(engine.render("page", &Hash::new()).unwrap(), "H|b");
}

#[test]
#[ntest::timeout(100)]
fn test_extends_must_come_first() {
    let result = Template::parse("text{% extends 'base' %}");
    let Err(LiquidError::Syntax(error)) = result else {
        panic!("expected a syntax error, got {result:?}");
    };
    assert_eq!(
        error.kind,
        ParseErrorKind::MisplacedTag {
            tag: "extends".into()
        }
    );
}

#[test]
#[ntest::timeout(200)]
fn test_include_with_indexed_value() {
    let engine = engine_with(&[
        ("product", "{{ product.title }}"),
        ("page", "{% include 'product' with products[0] %}"),
    ]);
    let locals = vars(&[(
        "products",
        Value::from(vec![
            Value::from([("title", "Draft 151cm")]),
            Value::from([("title", "Element 155cm")]),
        ]),
    )]);
    assert_eq!(engine.render("page", &locals).unwrap(), "Draft 151cm");
}

#[test]
#[ntest::timeout(200)]
fn test_include_attributes_and_scope() {
    let engine = engine_with(&[
        ("card", "{{ heading }}:{{ card }}:{{ outer }}"),
        (
            "page",
            "{% include 'card' with 'x', heading: 'H' %}|{{ heading }}|{{ card }}",
        ),
    ]);
    let locals = vars(&[("outer", Value::from("o"))]);
    assert_eq!(engine.render("page", &locals).unwrap(), "H:x:o||");
}

#[test]
#[ntest::timeout(200)]
fn test_include_for_renders_once_per_element() {
    let engine = engine_with(&[
        ("row", "[{{ row }}]"),
        ("table", "{% include 'row' for rows %}"),
    ]);
    let locals = vars(&[("rows", Value::from(vec!["a", "b", "c"]))]);
    assert_eq!(engine.render("table", &locals).unwrap(), "[a][b][c]");
}

#[test]
#[ntest::timeout(200)]
fn test_include_name_from_variable() {
    let engine = engine_with(&[("greeting", "hi"), ("page", "{% include partial %}")]);
    let locals = vars(&[("partial", Value::from("greeting"))]);
    assert_eq!(engine.render("page", &locals).unwrap(), "hi");
    // An unset name renders nothing with the engine's own source.
    assert_eq!(engine.render("page", &Hash::new()).unwrap(), "");
}

#[test]
#[ntest::timeout(200)]
fn test_caching_source_parses_once() {
    let source = Arc::new(CachingSource::new(MemorySource::new(&[("part", "*")])));
    let template = Template::parse("{% for i in (1..5) %}{% include 'part' %}{% endfor %}")
        .unwrap()
        .with_source(source.clone());

    assert_eq!(template.render(&Hash::new()).unwrap(), "*****");
    assert_eq!(source.cache_misses(), 1);
    assert_eq!(source.cache_hits(), 4);

    source.clear();
    assert_eq!(template.render(&Hash::new()).unwrap(), "*****");
    assert_eq!(source.cache_misses(), 2);
}

#[test]
#[ntest::timeout(1000)]
fn test_self_include_hits_recursion_limit() {
    let engine = engine_with(&[("loop", "x{% include 'loop' %}")]);
    assert_eq!(
        engine.render("loop", &Hash::new()),
        Err(LiquidError::RecursionLimit { limit: 100 })
    );
}

#[test]
#[ntest::timeout(1000)]
fn test_mutual_include_hits_recursion_limit_in_every_mode() {
    let engine = engine_with(&[
        ("a", "{% include 'b' %}"),
        ("b", "{% if true %}{% include 'a' %}{% endif %}"),
    ]);
    for mode in [ErrorMode::Inline, ErrorMode::Suppress, ErrorMode::Rethrow] {
        let options = RenderOptions::default()
            .with_error_mode(mode)
            .with_max_depth(10);
        assert_eq!(
            engine.render_with("a", options),
            Err(LiquidError::RecursionLimit { limit: 10 })
        );
    }
}

#[test]
#[ntest::timeout(200)]
fn test_extends_cycle_hits_recursion_limit() {
    let engine = engine_with(&[("a", "{% extends 'b' %}"), ("b", "{% extends 'a' %}")]);
    assert!(matches!(
        engine.render("a", &Hash::new()),
        Err(LiquidError::RecursionLimit { .. })
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_derived_member_shadows_base() {
    let template = Template::parse("{{ item.name }} {{ item.id }} [{{ item.secret }}]").unwrap();
    let locals = vars(&[(
        "item",
        Value::from_drop(DerivedItem {
            base: BaseItem { id: 7 },
        }),
    )]);
    assert_eq!(template.render(&locals).unwrap(), "derived 7 []");

    let table = MemberCache::global().table_for::<DerivedItem>(NamingConvention::RUBY);
    assert_eq!(table.declaring_type("name"), Some(TypeId::of::<DerivedItem>()));
    assert_eq!(table.declaring_type("id"), Some(TypeId::of::<BaseItem>()));
    assert_eq!(table.declaring_type("secret"), None);
}

#[test]
#[ntest::timeout(100)]
fn test_drop_output_rules() {
    let template =
        Template::parse("[{{ p }}]{{ p.title }}:{% for t in p.product_tags %}<{{ t }}>{% endfor %}")
            .unwrap();
    let locals = vars(&[(
        "p",
        Value::from_drop(Product {
            title: "Board",
            tags: vec!["snow", "wax"],
        }),
    )]);
    assert_eq!(template.render(&locals).unwrap(), "[]Board:<snow><wax>");
}

#[test]
#[ntest::timeout(100)]
fn test_catch_all_answers_unregistered_members() {
    let template =
        Template::parse("{{ t.locale }}:{{ t.hello }}:{{ t['bye'] }}:[{{ t.missing }}]").unwrap();
    let locals = vars(&[(
        "t",
        Value::from_drop(Translations {
            locale: "en",
            phrases: vars(&[
                ("hello", Value::from("Hello")),
                ("bye", Value::from("Bye")),
                ("locale", Value::from("shadowed")),
            ]),
        }),
    )]);
    assert_eq!(template.render(&locals).unwrap(), "en:Hello:Bye:[]");
}

#[test]
#[ntest::timeout(200)]
fn test_iterable_drop_in_for_and_include() {
    let engine = engine_with(&[
        ("book", "<{{ book }}>"),
        ("count", "{{ count.size }}/{{ count.owner }}"),
        (
            "page",
            "{% for b in shelf reversed %}{{ b }}{% endfor %}|{% include 'book' for shelf %}|{% include 'count' with shelf %}",
        ),
    ]);
    let locals = vars(&[("shelf", Value::from_drop(Shelf(vec!["a", "b"])))]);
    assert_eq!(engine.render("page", &locals).unwrap(), "ba|<a><b>|2/ada");

    let empty = Template::parse("{% for b in shelf %}{{ b }}{% else %}none{% endfor %}").unwrap();
    let locals = vars(&[("shelf", Value::from_drop(Shelf(Vec::new())))]);
    assert_eq!(empty.render(&locals).unwrap(), "none");
}

#[test]
#[ntest::timeout(200)]
fn test_huge_range_is_limited_before_it_is_built() {
    let template =
        Template::parse("{% for i in (1..9223372036854775807) limit: 2 %}{{ i }}{% endfor %}").unwrap();
    assert_eq!(template.render(&Hash::new()).unwrap(), "12");

    let template =
        Template::parse("{% for i in (1..30000000) offset: 5 limit: 3 %}{{ i }}{% endfor %}").unwrap();
    assert_eq!(template.render(&Hash::new()).unwrap(), "678");

    let template = Template::parse("{% for i in (1..n) limit: 0 %}{{ i }}{% else %}empty{% endfor %}").unwrap();
    assert_eq!(template.render(&vars(&[("n", Value::Int(5))])).unwrap(), "empty");
}

#[test]
#[ntest::timeout(200)]
fn test_unbounded_range_is_a_render_error() {
    let template =
        Template::parse("a{% for i in (1..9223372036854775807) %}{{ i }}{% endfor %}b").unwrap();
    assert!(matches!(
        template.render_with(rethrow()),
        Err(LiquidError::Render(_))
    ));
    assert_eq!(
        template.render(&Hash::new()).unwrap(),
        "aLiquid error: Rendering error: range (1..9223372036854775807) exceeds 1000000 elementsb"
    );

    let output = Template::parse("{{ (-9223372036854775808..9223372036854775807) }}").unwrap();
    assert!(matches!(
        output.render_with(rethrow()),
        Err(LiquidError::Render(_))
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_native_member_name_suggests_template_name() {
    let template = Template::parse("{{ p.ProductTags }}").unwrap();
    let locals = vars(&[(
        "p",
        Value::from_drop(Product {
            title: "Board",
            tags: Vec::new(),
        }),
    )]);
    assert_eq!(
        template.render(&locals).unwrap(),
        "Liquid error: Missing property. Did you mean 'product_tags'?"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_verbatim_naming_uses_native_names() {
    let options = ParseOptions::default().with_naming(NamingConvention::VERBATIM);
    let template = Template::parse_with("{{ p.Title }}|{{ p.title }}", &options).unwrap();
    let locals = vars(&[(
        "p",
        Value::from_drop(Product {
            title: "Board",
            tags: Vec::new(),
        }),
    )]);
    assert_eq!(template.render(&locals).unwrap(), "Board|");
}

#[test]
#[ntest::timeout(100)]
fn test_scope_depth_follows_blocks() {
    let template = Template::parse(concat!(
        "{{ p.depth }}",
        "{% for i in (1..1) %}{{ p.depth }}{% for j in (1..1) %}{{ p.depth }}{% endfor %}{% endfor %}",
        "{% case 1 %}{% when 1 %}{{ p.depth }}{% endcase %}",
        "{% capture c %}{{ p.depth }}{% endcapture %}{{ c }}",
        "{% if true %}{{ p.depth }}{% endif %}",
    ))
    .unwrap();
    let locals = vars(&[("p", Value::from_drop(DepthReporter))]);
    assert_eq!(template.render(&locals).unwrap(), "123221");
}

#[test]
#[ntest::timeout(100)]
fn test_scopes_are_popped_on_error() {
    let template = Template::parse(
        "{% for i in (1..2) %}{% case i %}{% when 2 %}{{ i | nope }}{% endcase %}{% endfor %}",
    )
    .unwrap();
    let mut context = Context::new(rethrow());
    assert_eq!(
        template.render_context(&mut context),
        Err(LiquidError::UnknownFilter("nope".into()))
    );
    assert_eq!(context.scope_depth(), 1);
}

#[test]
#[ntest::timeout(100)]
fn test_parse_is_deterministic() {
    let text = "{% if a %}{{ b | f: 1, 'x' }}{% elsif c %}{% for i in d %}{{ i }}{% endfor %}{% endif %}";
    let first = Template::parse(text).unwrap();
    let second = Template::parse(text).unwrap();
    assert_eq!(format!("{:?}", first.root()), format!("{:?}", second.root()));
}

#[test]
#[ntest::timeout(100)]
fn test_symbolic_logic_operators_truncate() {
    let and = Template::parse("{% if a == 1 && b == 2 %}yes{% else %}no{% endif %}").unwrap();
    let locals = vars(&[("a", Value::Int(1)), ("b", Value::Int(0))]);
    assert_eq!(and.render(&locals).unwrap(), "yes");

    let or = Template::parse("{% if a || b %}yes{% else %}no{% endif %}").unwrap();
    let locals = vars(&[("a", Value::Bool(false)), ("b", Value::Bool(true))]);
    assert_eq!(or.render(&locals).unwrap(), "no");
}

#[test]
#[ntest::timeout(100)]
fn test_error_modes() {
    let template = Template::parse("a{{ x | nope }}b").unwrap();

    assert_eq!(
        template.render(&Hash::new()).unwrap(),
        "aLiquid error: Unknown filter 'nope'b"
    );

    let marked = RenderOptions::default().with_error_marker("!! ");
    assert_eq!(
        template.render_with(marked).unwrap(),
        "a!! Unknown filter 'nope'b"
    );

    let mut context = Context::new(RenderOptions::default().with_error_mode(ErrorMode::Suppress));
    assert_eq!(template.render_context(&mut context).unwrap(), "ab");
    assert_eq!(
        context.errors(),
        &[LiquidError::UnknownFilter("nope".into())]
    );

    assert_eq!(
        template.render_with(rethrow()),
        Err(LiquidError::UnknownFilter("nope".into()))
    );
}

#[test]
#[ntest::timeout(100)]
fn test_strict_variables() {
    let template = Template::parse("{{ missing }}").unwrap();
    assert_eq!(template.render(&Hash::new()).unwrap(), "");
    assert_eq!(
        template.render_with(rethrow().strict(true)),
        Err(LiquidError::Undefined {
            path: "missing".into()
        })
    );

    let present = Template::parse("{{ user.nickname }}").unwrap();
    let options = RenderOptions::new(vars(&[("user", Value::from([("name", "Ada")]))]))
        .with_error_mode(ErrorMode::Rethrow)
        .strict(true);
    assert_eq!(present.render_with(options).unwrap(), "");
}

#[test]
#[ntest::timeout(100)]
fn test_filters() {
    let mut filters = Filters::new();
    filters
        .register("upcase", |input, _args| {
            Ok(Value::from(input.to_output().to_uppercase()))
        })
        .register("append", |input, args| {
            let mut out = input.to_output();
            for arg in args {
                arg.render_to(&mut out);
            }
            Ok(Value::from(out))
        })
        .register("fail", |_input, _args| Err("always".to_owned()));

    let template = Template::parse("{{ name | upcase | append: '-', 1 }}{{ name | fail }}").unwrap();
    let options = RenderOptions::new(vars(&[("name", Value::from("ada"))])).with_filters(filters);
    assert_eq!(
        template.render_with(options).unwrap(),
        "ADA-1Liquid error: Error in filter 'fail': always"
    );
}

#[derive(Debug)]
struct Shout(String);

impl Render for Shout {
    fn render(&self, _context: &mut Context, out: &mut String) -> liquette::LiquidResult<()> {
        out.push_str(&self.0);
        Ok(())
    }
}

#[test]
#[ntest::timeout(100)]
fn test_custom_tag() {
    let mut tags = TagRegistry::with_standard_tags();
    tags.register(
        "shout",
        |_tag: &str, markup: &str| -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
            Ok(custom(Shout(markup.trim().to_uppercase())))
        },
    );
    let options = ParseOptions::default().with_tags(tags);

    let template = Template::parse_with("{% shout hello %}!", &options).unwrap();
    assert_eq!(template.render(&Hash::new()).unwrap(), "HELLO!");

    assert!(matches!(
        Template::parse("{% shout hello %}"),
        Err(LiquidError::Syntax(_))
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_quoted_delimiters_do_not_close_markup() {
    let template = Template::parse("{{ 'a }}' }}|{% assign x = '%}' %}{{ x }}").unwrap();
    assert_eq!(template.render(&Hash::new()).unwrap(), "a }}|%}");
}

#[test]
#[ntest::timeout(100)]
fn test_random_whitespace_inside_markup() {
    let text = format!(
        "{{%{}for{}cat{}in{}cats{}%}}Hi {{{{{}cat{}}}}}\n{{%{}endfor{}%}}",
        generate_random_whitespace(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
    );
    let template = Template::parse(&text).unwrap();
    let locals = vars(&[("cats", Value::from(vec!["Fluffy", "Mittens"]))]);
    assert_eq!(
        template.render(&locals).unwrap(),
        "Hi Fluffy\nHi Mittens\n"
    );
}

#[test]
#[ntest::timeout(200)]
fn test_local_file_system() {
    let root = std::env::temp_dir().join(format!("liquette-fs-{}", std::process::id()));
    std::fs::create_dir_all(root.join("shared")).unwrap();
    std::fs::write(root.join("shared").join("_card.liquid"), "card:{{ card }}").unwrap();

    let options = || rethrow().with_file_system(Arc::new(LocalFileSystem::new(&root)));
    let template = Template::parse("{% include 'shared/card' with 1 %}").unwrap();
    assert_eq!(template.render_with(options()).unwrap(), "card:1");

    let missing = Template::parse("{% include 'shared/none' %}").unwrap();
    assert_eq!(
        missing.render_with(options()),
        Err(LiquidError::not_found("shared/none"))
    );

    let unnamed = Template::parse("{% include nothing %}").unwrap();
    assert!(matches!(
        unnamed.render_with(options()),
        Err(LiquidError::Render(_))
    ));

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
#[ntest::timeout(500)]
fn test_engine_renders_from_many_threads() {
    let engine = Arc::new(engine_with(&[
        ("item", "<{{ item }}>"),
        ("list", "{% for i in items %}{% include 'item' with i %}{% endfor %}"),
    ]));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let locals = vars(&[("items", Value::from(vec![n, n]))]);
                engine.render("list", &locals).unwrap()
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("<{n}><{n}>"));
    }
}
