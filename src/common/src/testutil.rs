use crate::{Attribute, DataType, Field, TableSchema, Tuple};
use itertools::izip;
use rand::distributions::Alphanumeric;
use rand::{
    distributions::{Distribution, Uniform},
    thread_rng, Rng,
};

pub fn init() {
    // To change the log level for tests change the filter_level
    let _ = env_logger::builder()
        .is_test(true)
        //.filter_level(log::LevelFilter::Trace)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn gen_uniform_strings(n: u64, cardinality: Option<u64>, min: usize, max: usize) -> Vec<Field> {
    let mut rng = rand::thread_rng();
    let mut ret: Vec<Field> = Vec::new();
    if let Some(card) = cardinality {
        let values: Vec<Field> = (0..card)
            .map(|_| Field::String(gen_rand_string_range(min, max)))
            .collect();
        let uniform = Uniform::new(0, values.len());
        for _ in 0..n {
            let idx = uniform.sample(&mut rng);
            ret.push(values[idx].clone())
        }
    } else {
        for _ in 0..n {
            ret.push(Field::String(gen_rand_string_range(min, max)))
        }
    }
    ret
}

/// `n` ints drawn uniformly from `0..cardinality`, or any i64 without a
/// cardinality.
pub fn gen_uniform_ints(n: u64, cardinality: Option<u64>) -> Vec<Field> {
    let mut rng = rand::thread_rng();
    let mut ret = Vec::new();
    if let Some(card) = cardinality {
        let range = Uniform::new_inclusive(0, card as i64 - 1);
        for _ in 0..n {
            ret.push(Field::Int(range.sample(&mut rng)));
        }
    } else {
        for _ in 0..n {
            ret.push(Field::Int(rng.gen::<i64>()));
        }
    }
    ret
}

/// Random tuples matching [`get_test_tuple_schema`]: a key with the given
/// cardinality, a low cardinality int and a short string.
pub fn gen_test_tuples(n: u64, key_cardinality: u64) -> Vec<Tuple> {
    let keys = gen_uniform_ints(n, Some(key_cardinality));
    let i1 = gen_uniform_ints(n, Some(10));
    let s1 = gen_uniform_strings(n, Some(20), 2, 8);
    let mut tuples = Vec::new();
    for (k, a, s) in izip!(keys, i1, s1) {
        tuples.push(Tuple::new(vec![k, a, s]));
    }
    tuples
}

/// Schema of the tuples produced by [`gen_test_tuples`]; 16 bytes per record.
pub fn get_test_tuple_schema(table_name: &str) -> TableSchema {
    TableSchema::new(vec![
        Attribute::new(table_name, "id", DataType::Int),
        Attribute::new(table_name, "ia1", DataType::Int),
        Attribute::new(table_name, "sa1", DataType::String(8)),
    ])
}

/// Converts an int vector to a Tuple.
///
/// # Argument
///
/// * `data` - Data to put into tuple.
pub fn int_vec_to_tuple(data: Vec<i64>) -> Tuple {
    let mut tuple_data = Vec::new();

    for val in data {
        tuple_data.push(Field::Int(val));
    }

    Tuple::new(tuple_data)
}

/// Creates a Vec of tuples containing Ints given a 2D Vec of i64 's
pub fn create_tuple_list(tuple_data: Vec<Vec<i64>>) -> Vec<Tuple> {
    let mut tuples = Vec::new();
    for item in &tuple_data {
        let fields = item.iter().map(|i| Field::Int(*i)).collect();
        tuples.push(Tuple::new(fields));
    }
    tuples
}

/// Creates a new table schema for a table with width number of Ints,
/// named `c0`, `c1`, ...
pub fn get_int_table_schema(table_name: &str, width: usize) -> TableSchema {
    let mut attrs = Vec::new();
    for i in 0..width {
        attrs.push(Attribute::new(table_name, &format!("c{}", i), DataType::Int))
    }
    TableSchema::new(attrs)
}

pub fn gen_rand_string_range(min: usize, max: usize) -> String {
    if min >= max {
        return gen_rand_string(min);
    }
    let mut rng = rand::thread_rng();
    let size = rng.gen_range(min..max);
    thread_rng()
        .sample_iter(Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}

pub fn gen_rand_string(n: usize) -> String {
    thread_rng()
        .sample_iter(Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}
