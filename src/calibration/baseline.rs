//! Built-in benign corpus used when no dataset is supplied.
//!
//! Small, self-contained functions in the style of introductory programming
//! exercises. None of them should draw a finding from a security linter.

use super::dataset::StaticDatasetLoader;

pub const BASELINE_DATASET_NAME: &str = "builtin-baseline";

pub const BASELINE_CORPUS: &[&str] = &[
    "def add(a, b):\n    return a + b",
    "def factorial(n):\n    return 1 if n <= 1 else n * factorial(n - 1)",
    "def is_even(n):\n    return n % 2 == 0",
    "def reverse_string(s):\n    return s[::-1]",
    "def max_of_three(a, b, c):\n    return max(a, max(b, c))",
    "squares = [x ** 2 for x in range(10)]",
    "print('Hello, World!')",
    "def fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a",
    "def count_vowels(s):\n    return sum(1 for c in s.lower() if c in 'aeiou')",
    "def is_palindrome(s):\n    cleaned = ''.join(c for c in s.lower() if c.isalnum())\n    return cleaned == cleaned[::-1]",
    "def gcd(a, b):\n    while b:\n        a, b = b, a % b\n    return a",
    "def lcm(a, b):\n    return a * b // gcd(a, b)",
    "def flatten(items):\n    return [x for sub in items for x in sub]",
    "def unique(items):\n    seen = set()\n    out = []\n    for x in items:\n        if x not in seen:\n            seen.add(x)\n            out.append(x)\n    return out",
    "def word_count(text):\n    counts = {}\n    for word in text.split():\n        counts[word] = counts.get(word, 0) + 1\n    return counts",
    "def celsius_to_fahrenheit(c):\n    return c * 9 / 5 + 32",
    "def is_prime(n):\n    if n < 2:\n        return False\n    for i in range(2, int(n ** 0.5) + 1):\n        if n % i == 0:\n            return False\n    return True",
    "def chunk(items, size):\n    return [items[i:i + size] for i in range(0, len(items), size)]",
    "def binary_search(items, target):\n    lo, hi = 0, len(items) - 1\n    while lo <= hi:\n        mid = (lo + hi) // 2\n        if items[mid] == target:\n            return mid\n        if items[mid] < target:\n            lo = mid + 1\n        else:\n            hi = mid - 1\n    return -1",
    "def sum_digits(n):\n    return sum(int(d) for d in str(abs(n)))",
    "def capitalize_words(s):\n    return ' '.join(w.capitalize() for w in s.split())",
    "def merge_dicts(a, b):\n    merged = dict(a)\n    merged.update(b)\n    return merged",
    "def average(values):\n    return sum(values) / len(values) if values else 0.0",
    "def transpose(matrix):\n    return [list(row) for row in zip(*matrix)]",
    "def remove_whitespace(s):\n    return ''.join(s.split())",
    "def second_largest(items):\n    ordered = sorted(set(items))\n    return ordered[-2] if len(ordered) > 1 else None",
    "def power_set(items):\n    result = [[]]\n    for x in items:\n        result += [subset + [x] for subset in result]\n    return result",
    "def rotate_left(items, k):\n    if not items:\n        return items\n    k %= len(items)\n    return items[k:] + items[:k]",
    "class Stack:\n    def __init__(self):\n        self.items = []\n\n    def push(self, item):\n        self.items.append(item)\n\n    def pop(self):\n        return self.items.pop()",
    "from collections import Counter\n\ndef most_common(items):\n    return Counter(items).most_common(1)[0][0]",
    "import math\n\ndef circle_area(r):\n    return math.pi * r ** 2",
    "def dedupe_sorted(items):\n    return sorted(set(items))",
    "def count_occurrences(items, target):\n    return sum(1 for x in items if x == target)",
    "def safe_divide(a, b):\n    try:\n        return a / b\n    except ZeroDivisionError:\n        return None",
    "def zip_to_dict(keys, values):\n    return dict(zip(keys, values))",
    "def running_total(values):\n    total = 0\n    out = []\n    for v in values:\n        total += v\n        out.append(total)\n    return out",
    "def clamp(x, lo, hi):\n    return max(lo, min(x, hi))",
    "def first_non_repeating(s):\n    for c in s:\n        if s.count(c) == 1:\n            return c\n    return None",
    "def to_snake_case(name):\n    out = []\n    for i, c in enumerate(name):\n        if c.isupper() and i:\n            out.append('_')\n        out.append(c.lower())\n    return ''.join(out)",
    "def matrix_sum(matrix):\n    return sum(sum(row) for row in matrix)",
];

/// Loader over [`BASELINE_CORPUS`].
pub fn baseline_loader() -> StaticDatasetLoader {
    StaticDatasetLoader::new(
        BASELINE_DATASET_NAME,
        BASELINE_CORPUS.iter().map(|s| s.to_string()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::dataset::{DatasetLoader, SYNTHETIC_VULNERABILITIES};

    #[test]
    fn test_corpus_is_distinct_from_synthetic_patterns() {
        for snippet in BASELINE_CORPUS {
            assert!(!SYNTHETIC_VULNERABILITIES.contains(snippet));
            assert!(!snippet.contains("eval("));
            assert!(!snippet.contains("exec("));
        }
    }

    #[test]
    fn test_loader_caps_at_corpus_size() {
        let loader = baseline_loader();
        assert_eq!(loader.name(), BASELINE_DATASET_NAME);
        assert_eq!(loader.load(5).unwrap().len(), 5);
        assert_eq!(loader.load(1000).unwrap().len(), BASELINE_CORPUS.len());
    }
}
