// src/utils/category.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Coarse grouping shown in the inventory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Category {
    Produce,
    Dairy,
    #[serde(rename = "Meat & Seafood")]
    MeatSeafood,
    #[serde(rename = "Dry Goods")]
    DryGoods,
    Frozen,
    Beverages,
    Supplies,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Produce => "Produce",
            Category::Dairy => "Dairy",
            Category::MeatSeafood => "Meat & Seafood",
            Category::DryGoods => "Dry Goods",
            Category::Frozen => "Frozen",
            Category::Beverages => "Beverages",
            Category::Supplies => "Supplies",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained classification picked on every line item. Each one belongs to
/// exactly one [`Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Subcategory {
    Fruits,
    Vegetables,
    Herbs,
    #[serde(rename = "Milk & Cream")]
    MilkCream,
    Cheese,
    Eggs,
    Butter,
    Beef,
    Pork,
    Poultry,
    Seafood,
    #[serde(rename = "Grains & Pasta")]
    GrainsPasta,
    Baking,
    Spices,
    #[serde(rename = "Canned Goods")]
    CannedGoods,
    #[serde(rename = "Oils & Condiments")]
    OilsCondiments,
    #[serde(rename = "Frozen Vegetables")]
    FrozenVegetables,
    #[serde(rename = "Frozen Meals")]
    FrozenMeals,
    #[serde(rename = "Ice Cream")]
    IceCream,
    #[serde(rename = "Soft Drinks")]
    SoftDrinks,
    Juices,
    #[serde(rename = "Coffee & Tea")]
    CoffeeTea,
    Alcohol,
    Cleaning,
    Disposables,
    #[serde(rename = "Paper Goods")]
    PaperGoods,
}

impl Subcategory {
    pub const ALL: [Subcategory; 26] = [
        Subcategory::Fruits,
        Subcategory::Vegetables,
        Subcategory::Herbs,
        Subcategory::MilkCream,
        Subcategory::Cheese,
        Subcategory::Eggs,
        Subcategory::Butter,
        Subcategory::Beef,
        Subcategory::Pork,
        Subcategory::Poultry,
        Subcategory::Seafood,
        Subcategory::GrainsPasta,
        Subcategory::Baking,
        Subcategory::Spices,
        Subcategory::CannedGoods,
        Subcategory::OilsCondiments,
        Subcategory::FrozenVegetables,
        Subcategory::FrozenMeals,
        Subcategory::IceCream,
        Subcategory::SoftDrinks,
        Subcategory::Juices,
        Subcategory::CoffeeTea,
        Subcategory::Alcohol,
        Subcategory::Cleaning,
        Subcategory::Disposables,
        Subcategory::PaperGoods,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Subcategory::Fruits => "Fruits",
            Subcategory::Vegetables => "Vegetables",
            Subcategory::Herbs => "Herbs",
            Subcategory::MilkCream => "Milk & Cream",
            Subcategory::Cheese => "Cheese",
            Subcategory::Eggs => "Eggs",
            Subcategory::Butter => "Butter",
            Subcategory::Beef => "Beef",
            Subcategory::Pork => "Pork",
            Subcategory::Poultry => "Poultry",
            Subcategory::Seafood => "Seafood",
            Subcategory::GrainsPasta => "Grains & Pasta",
            Subcategory::Baking => "Baking",
            Subcategory::Spices => "Spices",
            Subcategory::CannedGoods => "Canned Goods",
            Subcategory::OilsCondiments => "Oils & Condiments",
            Subcategory::FrozenVegetables => "Frozen Vegetables",
            Subcategory::FrozenMeals => "Frozen Meals",
            Subcategory::IceCream => "Ice Cream",
            Subcategory::SoftDrinks => "Soft Drinks",
            Subcategory::Juices => "Juices",
            Subcategory::CoffeeTea => "Coffee & Tea",
            Subcategory::Alcohol => "Alcohol",
            Subcategory::Cleaning => "Cleaning",
            Subcategory::Disposables => "Disposables",
            Subcategory::PaperGoods => "Paper Goods",
        }
    }
}

impl fmt::Display for Subcategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subcategory '{0}'")]
pub struct UnknownSubcategory(pub String);

/// Unrecognised names are rejected; there is no fallback bucket.
impl FromStr for Subcategory {
    type Err = UnknownSubcategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Subcategory::ALL
            .into_iter()
            .find(|sub| sub.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownSubcategory(s.to_string()))
    }
}

/// Maps a subcategory to the single category it belongs to.
pub fn main_category_of(subcategory: Subcategory) -> Category {
    use Subcategory::*;

    match subcategory {
        Fruits | Vegetables | Herbs => Category::Produce,
        MilkCream | Cheese | Eggs | Butter => Category::Dairy,
        Beef | Pork | Poultry | Seafood => Category::MeatSeafood,
        GrainsPasta | Baking | Spices | CannedGoods | OilsCondiments => Category::DryGoods,
        FrozenVegetables | FrozenMeals | IceCream => Category::Frozen,
        SoftDrinks | Juices | CoffeeTea | Alcohol => Category::Beverages,
        Cleaning | Disposables | PaperGoods => Category::Supplies,
    }
}

/// One row of the category table served to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryMapping {
    pub subcategory: Subcategory,
    pub category: Category,
}

pub fn category_table() -> Vec<CategoryMapping> {
    Subcategory::ALL
        .into_iter()
        .map(|subcategory| CategoryMapping {
            subcategory,
            category: main_category_of(subcategory),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subcategory_maps_to_a_category() {
        let table = category_table();
        assert_eq!(table.len(), Subcategory::ALL.len());
        assert_eq!(main_category_of(Subcategory::Fruits), Category::Produce);
        assert_eq!(main_category_of(Subcategory::MilkCream), Category::Dairy);
        assert_eq!(main_category_of(Subcategory::IceCream), Category::Frozen);
        assert_eq!(main_category_of(Subcategory::PaperGoods), Category::Supplies);
    }

    #[test]
    fn unknown_subcategory_is_an_error() {
        assert_eq!(
            "Gadgets".parse::<Subcategory>(),
            Err(UnknownSubcategory("Gadgets".to_string()))
        );
        assert!(serde_json::from_str::<Subcategory>("\"other\"").is_err());
    }

    #[test]
    fn parsing_ignores_case_and_padding() {
        assert_eq!(" milk & cream ".parse::<Subcategory>(), Ok(Subcategory::MilkCream));
        assert_eq!("Coffee & Tea".parse::<Subcategory>(), Ok(Subcategory::CoffeeTea));
    }

    #[test]
    fn labels_match_serde_names() {
        for sub in Subcategory::ALL {
            let json = serde_json::to_string(&sub).unwrap();
            assert_eq!(json, format!("\"{}\"", sub.as_str()));
        }
    }
}
