//! Ukrainian → Latin transliteration (national system of 2010).

const APOSTROPHES: &[char] = &['\'', '’', 'ʼ', '`'];

fn latin(lower: char, word_start: bool, after_z: bool) -> Option<&'static str> {
    let s = match lower {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' if after_z => "gh",
        'г' => "h",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'є' if word_start => "ye",
        'є' => "ie",
        'ж' => "zh",
        'з' => "z",
        'и' => "y",
        'і' => "i",
        'ї' if word_start => "yi",
        'ї' => "i",
        'й' if word_start => "y",
        'й' => "i",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ь' => "",
        'ю' if word_start => "yu",
        'ю' => "iu",
        'я' if word_start => "ya",
        'я' => "ia",
        _ => return None,
    };
    Some(s)
}

fn is_letter(c: char) -> bool {
    c.is_alphabetic()
}

pub fn translit(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    let mut prev_lower: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if APOSTROPHES.contains(&c) {
            continue;
        }

        let lower = c.to_lowercase().next().unwrap_or(c);
        match latin(lower, word_start, prev_lower == Some('з')) {
            Some(mapped) => {
                if c.is_uppercase() && !mapped.is_empty() {
                    let next_upper = chars[i + 1..]
                        .iter()
                        .find(|n| !APOSTROPHES.contains(n))
                        .is_some_and(|n| n.is_uppercase());
                    if next_upper {
                        out.push_str(&mapped.to_uppercase());
                    } else {
                        let mut letters = mapped.chars();
                        if let Some(first) = letters.next() {
                            out.extend(first.to_uppercase());
                            out.push_str(letters.as_str());
                        }
                    }
                } else {
                    out.push_str(mapped);
                }
            }
            None => out.push(c),
        }

        word_start = !is_letter(c);
        prev_lower = Some(lower);
    }
    out
}
