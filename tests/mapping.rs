// ABOUTME: End-to-end mapping tests: hierarchies, element order, dynamic
// ABOUTME: members, dictionaries, cycles, and representation conversions.

use bsonic::codec::SharedCodec;
use bsonic::{
    decode_document, doc, from_extended_json_with, from_slice_with, to_document_with,
    to_extended_json_with, to_vec_with, AnyValue, Bson, BsonType, ClassMapBuilder, ClassOptions,
    Converter, EnumCodec, EnumTable, Error, JsonOutputMode, MemberOptions, MultiArray, ObjectId,
    Registry, Timestamp,
};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

trait Shape {
    fn as_any(&self) -> &dyn Any;
    fn area(&self) -> f64;
    fn boxed_clone(&self) -> Box<dyn Shape>;
}

#[derive(Default, Debug, PartialEq, Clone)]
struct Circle {
    radius: f64,
}

#[derive(Default, Debug, PartialEq, Clone)]
struct Square {
    side: f64,
}

impl Shape for Circle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    fn boxed_clone(&self) -> Box<dyn Shape> {
        Box::new(self.clone())
    }
}

impl Shape for Square {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn area(&self) -> f64 {
        self.side * self.side
    }

    fn boxed_clone(&self) -> Box<dyn Shape> {
        Box::new(self.clone())
    }
}

fn shape_registry() -> Registry {
    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Circle>::new("Circle")
                .member("radius", |c: &Circle| c.radius, |c, v| c.radius = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();
    registry
        .register_class(
            ClassMapBuilder::<Square>::new("Square")
                .member("side", |s: &Square| s.side, |s, v| s.side = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();
    registry
        .register_hierarchy::<Box<dyn Shape>>("Shape", |b| b.as_any())
        .unwrap();
    registry
        .register_hierarchy_member::<Box<dyn Shape>, Circle>(|c| Box::new(c))
        .unwrap();
    registry
        .register_hierarchy_member::<Box<dyn Shape>, Square>(|s| Box::new(s))
        .unwrap();
    registry
}

#[test]
fn trait_objects_round_trip_through_their_discriminator() {
    let registry = shape_registry();
    let shape: Box<dyn Shape> = Box::new(Circle { radius: 2.0 });
    let bytes = to_vec_with(&registry, &shape).unwrap();

    let doc = decode_document(&bytes).unwrap();
    assert_eq!(doc.get("_t"), Some(&Bson::String("Circle".into())));

    let back: Box<dyn Shape> = from_slice_with(&registry, &bytes).unwrap();
    let circle = back.as_any().downcast_ref::<Circle>().unwrap();
    assert_eq!(circle.radius, 2.0);
}

#[test]
fn shapes_inside_a_class_member_dispatch_dynamically() {
    let registry = shape_registry();

    struct Drawing {
        shape: Box<dyn Shape>,
    }

    impl Default for Drawing {
        fn default() -> Self {
            Drawing {
                shape: Box::new(Circle::default()),
            }
        }
    }

    registry
        .register_class(
            ClassMapBuilder::<Drawing>::new("Drawing")
                .member(
                    "shape",
                    |d: &Drawing| d.shape.boxed_clone(),
                    |d, v| d.shape = v,
                )
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let drawing = Drawing {
        shape: Box::new(Square { side: 3.0 }),
    };
    let doc = to_document_with(&registry, &drawing).unwrap();
    let shape_doc = doc.get("shape").and_then(Bson::as_document).unwrap();
    assert_eq!(shape_doc.get("_t"), Some(&Bson::String("Square".into())));

    let bytes = to_vec_with(&registry, &drawing).unwrap();
    let back: Drawing = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back.shape.area(), 9.0);
}

#[test]
fn hierarchy_roots_produce_the_discriminator_array() {
    // Animal <- Cat (root) <- Tiger
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Animal {
        age: i32,
    }
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Cat {
        age: i32,
    }
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Tiger {
        age: i32,
        stripes: i32,
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Animal>::new("Animal")
                .member("age", |a: &Animal| a.age, |a, v| a.age = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();
    registry
        .register_class(
            ClassMapBuilder::<Cat>::new("Cat")
                .member("age", |c: &Cat| c.age, |c, v| c.age = v)
                .build()
                .unwrap(),
            ClassOptions::new().parent::<Animal>().root(),
        )
        .unwrap();
    registry
        .register_class(
            ClassMapBuilder::<Tiger>::new("Tiger")
                .member("age", |t: &Tiger| t.age, |t, v| t.age = v)
                .member("stripes", |t: &Tiger| t.stripes, |t, v| t.stripes = v)
                .build()
                .unwrap(),
            ClassOptions::new().parent::<Cat>().required(),
        )
        .unwrap();

    let doc = to_document_with(&registry, &Tiger { age: 4, stripes: 90 }).unwrap();
    assert_eq!(
        doc.get("_t"),
        Some(&Bson::Array(vec![
            Bson::String("Cat".into()),
            Bson::String("Tiger".into()),
        ]))
    );

    let bytes = to_vec_with(&registry, &Tiger { age: 4, stripes: 90 }).unwrap();
    let back: Tiger = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back, Tiger { age: 4, stripes: 90 });
}

#[test]
fn id_timestamp_and_discriminator_lead_the_document() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Versioned {
        x1: String,
        id: ObjectId,
        x2: i32,
        version: Timestamp,
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Versioned>::new("Versioned")
                .member("x1", |v: &Versioned| v.x1.clone(), |v, s| v.x1 = s)
                .id_member("id", |v: &Versioned| v.id, |v, i| v.id = i)
                .member("x2", |v: &Versioned| v.x2, |v, i| v.x2 = i)
                .member("version", |v: &Versioned| v.version, |v, t| v.version = t)
                .build()
                .unwrap(),
            ClassOptions::new().required(),
        )
        .unwrap();

    let value = Versioned {
        x1: "first".into(),
        id: ObjectId::from_bytes([7; 12]),
        x2: 2,
        version: Timestamp {
            time: 10,
            increment: 1,
        },
    };
    let bytes = to_vec_with(&registry, &value).unwrap();
    let doc = decode_document(&bytes).unwrap();
    let names: Vec<&str> = doc.keys().collect();
    assert_eq!(names, ["_id", "version", "_t", "x1", "x2"]);

    let back: Versioned = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back, value);
}

#[test]
fn dynamic_members_are_wrapped_and_recovered_exactly() {
    struct Envelope {
        payload: u16,
    }

    impl Default for Envelope {
        fn default() -> Self {
            Envelope { payload: 0 }
        }
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Envelope>::new("Envelope")
                .member(
                    "payload",
                    |e: &Envelope| Box::new(e.payload) as AnyValue,
                    |e, v: AnyValue| e.payload = *v.downcast::<u16>().unwrap(),
                )
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let doc = to_document_with(&registry, &Envelope { payload: 300 }).unwrap();
    let wrapper = doc.get("payload").and_then(Bson::as_document).unwrap();
    assert_eq!(wrapper.get("_t"), Some(&Bson::String("u16".into())));
    assert_eq!(wrapper.get("_v"), Some(&Bson::Int32(300)));

    let bytes = to_vec_with(&registry, &Envelope { payload: 300 }).unwrap();
    let back: Envelope = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back.payload, 300);
}

#[test]
fn reference_cycles_are_detected_and_dags_pass() {
    #[derive(Default, Clone)]
    struct Node {
        name: String,
        next: Option<Rc<RefCell<Node>>>,
    }

    let registry = Registry::new();
    registry.register_codec(Arc::new(SharedCodec::<Node>::new()));
    registry
        .register_class(
            ClassMapBuilder::<Node>::new("Node")
                .member("name", |n: &Node| n.name.clone(), |n, v| n.name = v)
                .optional_member("next", |n: &Node| n.next.clone(), |n, v| n.next = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    // A straight chain encodes fine.
    let tail = Rc::new(RefCell::new(Node {
        name: "tail".into(),
        next: None,
    }));
    let head = Rc::new(RefCell::new(Node {
        name: "head".into(),
        next: Some(tail.clone()),
    }));
    let doc = to_document_with(&registry, &head).unwrap();
    let next = doc.get("next").and_then(Bson::as_document).unwrap();
    assert_eq!(next.get("name"), Some(&Bson::String("tail".into())));

    // Closing the loop must fail instead of recursing forever. The failure
    // surfaces annotated with the member that closed the cycle.
    tail.borrow_mut().next = Some(head.clone());
    let err = to_document_with(&registry, &head).unwrap_err();
    assert_eq!(err.kind(), "circular_reference");
    match err {
        Error::Member { member, source, .. } => {
            assert_eq!(member, "next");
            assert!(matches!(*source, Error::CircularReference));
        }
        other => panic!("expected a member error, got {other:?}"),
    }
}

#[test]
fn member_representations_convert_and_classify_losses() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Reading {
        count: i64,
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Reading>::new("Reading")
                .member_with(
                    MemberOptions::new(
                        "count",
                        |r: &Reading| r.count,
                        |r, v| r.count = v,
                    )
                    .representation(Converter::new(BsonType::Int32)),
                )
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let doc = to_document_with(&registry, &Reading { count: 9 }).unwrap();
    assert_eq!(doc.get("count"), Some(&Bson::Int32(9)));

    let err = to_document_with(&registry, &Reading { count: i64::from(i32::MAX) + 1 })
        .unwrap_err();
    match err {
        Error::Member { class, member, source } => {
            assert_eq!(class, "Reading");
            assert_eq!(member, "count");
            assert!(matches!(*source, Error::Overflow(_)));
        }
        other => panic!("expected a member error, got {other:?}"),
    }
}

#[test]
fn enums_round_trip_by_name_and_by_number() {
    #[derive(Default, Debug, PartialEq, Clone, Copy)]
    enum Color {
        #[default]
        Red,
        Green,
        Blue,
    }

    fn color_codec() -> EnumCodec<Color> {
        EnumCodec::new(
            EnumTable::new(vec![("Red", 0), ("Green", 1), ("Blue", 2)]),
            |c| *c as i64,
            |raw| match raw {
                0 => Some(Color::Red),
                1 => Some(Color::Green),
                2 => Some(Color::Blue),
                _ => None,
            },
        )
    }

    #[derive(Default, Debug, PartialEq, Clone)]
    struct Pixel {
        color: Color,
    }

    let registry = Registry::new();
    registry.register_codec(Arc::new(color_codec().with_representation(BsonType::String)));
    registry
        .register_class(
            ClassMapBuilder::<Pixel>::new("Pixel")
                .member("color", |p: &Pixel| p.color, |p, v| p.color = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let doc = to_document_with(&registry, &Pixel { color: Color::Blue }).unwrap();
    assert_eq!(doc.get("color"), Some(&Bson::String("Blue".into())));
    let bytes = to_vec_with(&registry, &Pixel { color: Color::Blue }).unwrap();
    let back: Pixel = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back.color, Color::Blue);

    // Numeric representation through a member override.
    let numeric = Registry::new();
    numeric.register_codec(Arc::new(color_codec()));
    numeric
        .register_class(
            ClassMapBuilder::<Pixel>::new("Pixel")
                .member("color", |p: &Pixel| p.color, |p, v| p.color = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();
    let doc = to_document_with(&numeric, &Pixel { color: Color::Green }).unwrap();
    assert_eq!(doc.get("color"), Some(&Bson::Int32(1)));
}

#[test]
fn collections_nest_inside_classes() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Inventory {
        counts: BTreeMap<String, i32>,
        grid: Option<MultiArray<i32>>,
        tags: Vec<String>,
    }

    let registry = Registry::new();
    bsonic::register_vec::<String>(&registry);
    bsonic::register_btree_map::<String, i32>(&registry);
    bsonic::register_multi_array::<i32>(&registry, 2);
    registry
        .register_class(
            ClassMapBuilder::<Inventory>::new("Inventory")
                .member(
                    "counts",
                    |i: &Inventory| i.counts.clone(),
                    |i, v| i.counts = v,
                )
                .optional_member("grid", |i: &Inventory| i.grid.clone(), |i, v| i.grid = v)
                .member("tags", |i: &Inventory| i.tags.clone(), |i, v| i.tags = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let value = Inventory {
        counts: [("a".to_string(), 1), ("dotted.key".to_string(), 2)].into(),
        grid: Some(MultiArray::new(vec![2, 2], vec![1, 2, 3, 4]).unwrap()),
        tags: vec!["x".into(), "y".into()],
    };
    let bytes = to_vec_with(&registry, &value).unwrap();
    let back: Inventory = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back, value);

    // The dotted key forces the array-of-pairs form on the wire.
    let doc = decode_document(&bytes).unwrap();
    assert!(doc.get("counts").and_then(Bson::as_array).is_some());
}

#[test]
fn root_level_maps_round_trip_through_binary() {
    let registry = Registry::new();
    bsonic::register_btree_map::<String, i32>(&registry);

    let map: BTreeMap<String, i32> = [("a".to_string(), 1), ("b".to_string(), 2)].into();
    let bytes = to_vec_with(&registry, &map).unwrap();
    let back: BTreeMap<String, i32> = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back, map);
}

#[test]
fn integer_keyed_maps_take_the_pair_form_on_the_wire() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Tally {
        votes: BTreeMap<i32, i32>,
    }

    let registry = Registry::new();
    bsonic::register_btree_map::<i32, i32>(&registry);
    registry
        .register_class(
            ClassMapBuilder::<Tally>::new("Tally")
                .member("votes", |t: &Tally| t.votes.clone(), |t, v| t.votes = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let value = Tally {
        votes: [(1, 2), (3, 4)].into(),
    };
    let bytes = to_vec_with(&registry, &value).unwrap();
    let doc = decode_document(&bytes).unwrap();
    assert_eq!(
        doc.get("votes"),
        Some(&Bson::Array(vec![
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]),
            Bson::Array(vec![Bson::Int32(3), Bson::Int32(4)]),
        ]))
    );

    let back: Tally = from_slice_with(&registry, &bytes).unwrap();
    assert_eq!(back, value);
}

#[test]
fn shell_json_uses_constructor_literals() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Stamp {
        id: ObjectId,
        at: Timestamp,
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Stamp>::new("Stamp")
                .id_member("id", |s: &Stamp| s.id, |s, v| s.id = v)
                .member("at", |s: &Stamp| s.at, |s, v| s.at = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let value = Stamp {
        id: ObjectId::from_bytes([0xAB; 12]),
        at: Timestamp {
            time: 5,
            increment: 2,
        },
    };
    let json = to_extended_json_with(&registry, &value, JsonOutputMode::Shell).unwrap();
    let pattern = regex::Regex::new(
        r#"^\{"_id":ObjectId\("[0-9a-f]{24}"\),"at":Timestamp\(5, 2\)\}$"#,
    )
    .unwrap();
    assert!(pattern.is_match(&json), "unexpected shell output: {json}");

    let back: Stamp = from_extended_json_with(&registry, &json).unwrap();
    assert_eq!(back, value);
}

#[test]
fn unknown_document_elements_name_the_class_in_the_error() {
    #[derive(Default, Debug, PartialEq, Clone)]
    struct Slim {
        a: i32,
    }

    let registry = Registry::new();
    registry
        .register_class(
            ClassMapBuilder::<Slim>::new("Slim")
                .member("a", |s: &Slim| s.a, |s, v| s.a = v)
                .build()
                .unwrap(),
            ClassOptions::new(),
        )
        .unwrap();

    let bytes = bsonic::encode_document(&doc! { "a" => 1, "b" => 2 }).unwrap();
    let err = from_slice_with::<Slim>(&registry, &bytes).unwrap_err();
    assert!(matches!(err, Error::Format(msg) if msg.contains("Slim")));
}
